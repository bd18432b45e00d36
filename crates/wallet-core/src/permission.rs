//! # Permissions
//!
//! Byte-masked calldata rules for explicit session signers. A
//! [`Permission`] scopes one target contract with a list of
//! [`ParameterRule`]s, each comparing a masked 32-byte slice of the
//! ABI-encoded calldata against a reference value. [`PermissionBuilder`]
//! turns a human-authored function signature plus named parameter
//! constraints into those rules.

use crate::abi::{read_word, selector, word_from_u64};
use crate::payload::Call;
use crate::types::{keccak256_concat, keccak256_hash};
use crate::{Error, Result};
use alloy_primitives::{Address, B256, Bytes, U256};
use serde::{Deserialize, Serialize};

/// Comparison applied to a masked calldata word
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterOperation {
    Equal,
    NotEqual,
    GreaterThanOrEqual,
    LessThanOrEqual,
}

impl ParameterOperation {
    fn flag(&self) -> u8 {
        match self {
            ParameterOperation::Equal => 0,
            ParameterOperation::NotEqual => 1,
            ParameterOperation::GreaterThanOrEqual => 2,
            ParameterOperation::LessThanOrEqual => 3,
        }
    }
}

/// One byte-masked comparison over ABI-encoded calldata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterRule {
    /// Masked values accumulate into an on-chain usage limit
    pub cumulative: bool,
    /// Comparison operator
    pub operation: ParameterOperation,
    /// Reference value (compared after masking)
    pub value: B256,
    /// Byte offset of the 32-byte slice inside the calldata
    pub offset: usize,
    /// Bit mask applied to the slice before comparing
    pub mask: B256,
}

impl ParameterRule {
    /// Evaluate this rule against raw calldata
    pub fn matches(&self, data: &[u8]) -> bool {
        let word = read_word(data, self.offset) & self.mask;
        let value = self.value & self.mask;
        match self.operation {
            ParameterOperation::Equal => word == value,
            ParameterOperation::NotEqual => word != value,
            ParameterOperation::GreaterThanOrEqual => {
                U256::from_be_bytes(word.0) >= U256::from_be_bytes(value.0)
            }
            ParameterOperation::LessThanOrEqual => {
                U256::from_be_bytes(word.0) <= U256::from_be_bytes(value.0)
            }
        }
    }

    /// Masked calldata word as an amount, used for cumulative accounting
    pub fn masked_amount(&self, data: &[u8]) -> U256 {
        U256::from_be_bytes((read_word(data, self.offset) & self.mask).0)
    }

    fn encode_packed(&self, out: &mut Vec<u8>) {
        out.push((self.cumulative as u8) << 2 | self.operation.flag());
        out.extend_from_slice(self.value.as_slice());
        out.extend_from_slice(word_from_u64(self.offset as u64).as_slice());
        out.extend_from_slice(self.mask.as_slice());
    }

    fn decode_packed(data: &[u8]) -> Result<Self> {
        if data.len() != RULE_PACKED_LEN {
            return Err(Error::Deserialization(format!(
                "parameter rule wants {RULE_PACKED_LEN} bytes, got {}",
                data.len()
            )));
        }
        let operation = match data[0] & 0x03 {
            0 => ParameterOperation::Equal,
            1 => ParameterOperation::NotEqual,
            2 => ParameterOperation::GreaterThanOrEqual,
            _ => ParameterOperation::LessThanOrEqual,
        };
        let offset = U256::from_be_slice(&data[33..65]);
        Ok(Self {
            cumulative: data[0] & 0x04 != 0,
            operation,
            value: B256::from_slice(&data[1..33]),
            offset: offset.try_into().map_err(|_| {
                Error::Deserialization("parameter rule offset overflows usize".to_string())
            })?,
            mask: B256::from_slice(&data[65..97]),
        })
    }
}

/// Packed length of one [`ParameterRule`]
const RULE_PACKED_LEN: usize = 97;

/// Calldata rules scoped to one target contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    /// Contract the permission applies to
    pub target: Address,
    /// Rules that must all hold for a call to match
    pub rules: Vec<ParameterRule>,
}

impl Permission {
    /// Whether a call is covered by this permission
    pub fn matches_call(&self, call: &Call) -> bool {
        call.to == self.target && self.rules.iter().all(|rule| rule.matches(&call.data))
    }

    /// Packed encoding used for hashing and session leaves
    pub fn encode_packed(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(21 + self.rules.len() * 97);
        out.extend_from_slice(self.target.as_slice());
        out.push(self.rules.len() as u8);
        for rule in &self.rules {
            rule.encode_packed(&mut out);
        }
        out
    }

    /// Content hash of this permission
    pub fn hash(&self) -> B256 {
        keccak256_hash(&self.encode_packed())
    }

    /// Inverse of [`encode_packed`](Self::encode_packed); returns the
    /// permission and the number of bytes consumed
    pub fn decode_packed(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < 21 {
            return Err(Error::Deserialization(
                "truncated permission encoding".to_string(),
            ));
        }
        let target = Address::from_slice(&data[..20]);
        let count = data[20] as usize;
        let total = 21 + count * RULE_PACKED_LEN;
        if data.len() < total {
            return Err(Error::Deserialization(
                "truncated permission rules".to_string(),
            ));
        }
        let mut rules = Vec::with_capacity(count);
        for i in 0..count {
            let start = 21 + i * RULE_PACKED_LEN;
            rules.push(ParameterRule::decode_packed(
                &data[start..start + RULE_PACKED_LEN],
            )?);
        }
        Ok((Self { target, rules }, total))
    }
}

/// Usage-limit key for one cumulative rule of a signer's permission
pub fn usage_hash(signer: Address, permission: &Permission, rule_index: usize) -> B256 {
    keccak256_concat(&[
        b"Session usage:\n",
        signer.as_slice(),
        permission.hash().as_slice(),
        &[rule_index as u8],
    ])
}

// ============================================================================
// Builder
// ============================================================================

const SELECTOR_MASK_BYTES: usize = 4;
const WORD: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
enum ParamType {
    Uint(u16),
    Int(u16),
    Address,
    Bool,
    FixedBytes(u8),
    Bytes,
    String,
}

impl ParamType {
    fn is_dynamic(&self) -> bool {
        matches!(self, ParamType::Bytes | ParamType::String)
    }

    /// Canonical ABI name, e.g. `uint256`
    fn canonical(&self) -> String {
        match self {
            ParamType::Uint(bits) => format!("uint{bits}"),
            ParamType::Int(bits) => format!("int{bits}"),
            ParamType::Address => "address".to_string(),
            ParamType::Bool => "bool".to_string(),
            ParamType::FixedBytes(n) => format!("bytes{n}"),
            ParamType::Bytes => "bytes".to_string(),
            ParamType::String => "string".to_string(),
        }
    }

    /// Canonical mask for the type's significant bytes inside its ABI word
    fn mask(&self) -> B256 {
        match self {
            ParamType::Uint(bits) | ParamType::Int(bits) => mask_low((*bits as usize) / 8),
            ParamType::Address => mask_low(20),
            ParamType::Bool => mask_low(1),
            ParamType::FixedBytes(n) => mask_high(*n as usize),
            // Dynamic types are matched through pointer/length/chunk rules
            ParamType::Bytes | ParamType::String => B256::ZERO,
        }
    }
}

fn mask_low(bytes: usize) -> B256 {
    let mut out = [0u8; 32];
    for b in out.iter_mut().skip(32 - bytes) {
        *b = 0xff;
    }
    B256::from(out)
}

fn mask_high(bytes: usize) -> B256 {
    let mut out = [0u8; 32];
    for b in out.iter_mut().take(bytes) {
        *b = 0xff;
    }
    B256::from(out)
}

#[derive(Debug, Clone)]
struct Param {
    name: Option<String>,
    kind: ParamType,
}

#[derive(Debug, Clone)]
struct FunctionSignature {
    name: String,
    params: Vec<Param>,
}

impl FunctionSignature {
    fn canonical(&self) -> String {
        let types: Vec<String> = self.params.iter().map(|p| p.kind.canonical()).collect();
        format!("{}({})", self.name, types.join(","))
    }

    fn selector(&self) -> [u8; 4] {
        selector(&self.canonical())
    }

    fn param_index(&self, param: &str) -> Result<usize> {
        if let Some(index) = self
            .params
            .iter()
            .position(|p| p.name.as_deref() == Some(param))
        {
            return Ok(index);
        }
        // Unnamed parameters are addressable by position
        if let Ok(index) = param.parse::<usize>() {
            if index < self.params.len() {
                return Ok(index);
            }
        }
        Err(Error::InvalidPermission(format!(
            "unknown parameter '{param}' in {}",
            self.canonical()
        )))
    }
}

#[derive(Debug, Clone)]
enum Mode {
    AllowAll,
    ExactCalldata(Bytes),
    Function(FunctionSignature),
}

#[derive(Debug, Clone)]
enum ConstraintValue {
    Word(B256),
    Dynamic(Bytes),
}

#[derive(Debug, Clone)]
struct Constraint {
    param: String,
    operation: ParameterOperation,
    value: ConstraintValue,
    cumulative: bool,
}

/// Builds a [`Permission`] from a target, a calldata mode and parameter
/// constraints
///
/// Exactly one of `allow_all`, `exact_calldata` or `for_function` must be
/// selected before `build`; parameter constraints require `for_function` and
/// mixing them with the other modes is rejected.
#[derive(Debug, Clone)]
pub struct PermissionBuilder {
    target: Address,
    mode: Option<Mode>,
    constraints: Vec<Constraint>,
    only_once: bool,
    deferred: Option<String>,
}

impl PermissionBuilder {
    /// Start a permission for one target contract
    pub fn for_target(target: Address) -> Self {
        Self {
            target,
            mode: None,
            constraints: Vec::new(),
            only_once: false,
            deferred: None,
        }
    }

    /// Accept any calldata sent to the target
    pub fn allow_all(mut self) -> Self {
        self.set_mode(Mode::AllowAll);
        self
    }

    /// Accept exactly one calldata byte string
    pub fn exact_calldata(mut self, data: Bytes) -> Self {
        self.set_mode(Mode::ExactCalldata(data));
        self
    }

    /// Accept calls to one function, parsed from a human-readable signature
    /// such as `"function transfer(address to, uint256 amount)"`
    pub fn for_function(mut self, signature: &str) -> Self {
        match parse_function(signature) {
            Ok(parsed) => self.set_mode(Mode::Function(parsed)),
            Err(err) => self.defer(err.to_string()),
        }
        self
    }

    /// Require a parameter to equal a 32-byte word value
    pub fn where_equal(self, param: &str, value: B256) -> Self {
        self.constrain(param, ParameterOperation::Equal, ConstraintValue::Word(value), false)
    }

    /// Require a parameter to differ from a 32-byte word value
    pub fn where_not_equal(self, param: &str, value: B256) -> Self {
        self.constrain(
            param,
            ParameterOperation::NotEqual,
            ConstraintValue::Word(value),
            false,
        )
    }

    /// Require a numeric parameter to be at least `value`
    pub fn where_greater_or_equal(self, param: &str, value: U256) -> Self {
        self.constrain(
            param,
            ParameterOperation::GreaterThanOrEqual,
            ConstraintValue::Word(B256::from(value.to_be_bytes::<32>())),
            false,
        )
    }

    /// Require a numeric parameter to be at most `value`
    pub fn where_less_or_equal(self, param: &str, value: U256) -> Self {
        self.constrain(
            param,
            ParameterOperation::LessThanOrEqual,
            ConstraintValue::Word(B256::from(value.to_be_bytes::<32>())),
            false,
        )
    }

    /// Cap the running total of a numeric parameter (on-chain usage limit)
    pub fn where_cumulative(self, param: &str, limit: U256) -> Self {
        self.constrain(
            param,
            ParameterOperation::LessThanOrEqual,
            ConstraintValue::Word(B256::from(limit.to_be_bytes::<32>())),
            true,
        )
    }

    /// Require a dynamic `bytes`/`string` parameter to equal an exact value
    pub fn where_data_equal(self, param: &str, value: Bytes) -> Self {
        self.constrain(
            param,
            ParameterOperation::Equal,
            ConstraintValue::Dynamic(value),
            false,
        )
    }

    /// Exhaust the permission after a single use
    pub fn only_once(mut self) -> Self {
        self.only_once = true;
        self
    }

    /// Materialize the permission
    pub fn build(self) -> Result<Permission> {
        if let Some(message) = self.deferred {
            return Err(Error::InvalidPermission(message));
        }
        let mode = self.mode.ok_or_else(|| {
            Error::InvalidPermission(
                "no calldata mode selected; call allow_all, exact_calldata or for_function"
                    .to_string(),
            )
        })?;

        let rules = match mode {
            Mode::AllowAll => {
                if !self.constraints.is_empty() {
                    return Err(Error::InvalidPermission(
                        "parameter constraints cannot be combined with allow_all".to_string(),
                    ));
                }
                if self.only_once {
                    vec![ParameterRule {
                        cumulative: true,
                        operation: ParameterOperation::Equal,
                        value: B256::ZERO,
                        offset: 0,
                        mask: B256::ZERO,
                    }]
                } else {
                    Vec::new()
                }
            }
            Mode::ExactCalldata(data) => {
                if !self.constraints.is_empty() {
                    return Err(Error::InvalidPermission(
                        "parameter constraints cannot be combined with exact_calldata".to_string(),
                    ));
                }
                chunk_rules(&data, 0, self.only_once)
            }
            Mode::Function(function) => {
                build_function_rules(&function, &self.constraints, self.only_once)?
            }
        };

        Ok(Permission {
            target: self.target,
            rules,
        })
    }

    fn set_mode(&mut self, mode: Mode) {
        if self.mode.is_some() {
            self.defer("calldata mode selected twice".to_string());
        } else {
            self.mode = Some(mode);
        }
    }

    fn constrain(
        mut self,
        param: &str,
        operation: ParameterOperation,
        value: ConstraintValue,
        cumulative: bool,
    ) -> Self {
        self.constraints.push(Constraint {
            param: param.to_string(),
            operation,
            value,
            cumulative,
        });
        self
    }

    fn defer(&mut self, message: String) {
        if self.deferred.is_none() {
            self.deferred = Some(message);
        }
    }
}

/// Equality rules matching an exact byte string chunk by chunk
fn chunk_rules(data: &[u8], base_offset: usize, first_cumulative: bool) -> Vec<ParameterRule> {
    let mut rules = Vec::new();
    let mut offset = 0;
    while offset < data.len() || (offset == 0 && data.is_empty()) {
        let remaining = data.len() - offset;
        let take = usize::min(WORD, remaining);
        rules.push(ParameterRule {
            cumulative: first_cumulative && offset == 0,
            operation: ParameterOperation::Equal,
            value: read_word(data, offset),
            offset: base_offset + offset,
            mask: mask_high(take),
        });
        if remaining == 0 {
            break;
        }
        offset += take;
    }
    rules
}

fn build_function_rules(
    function: &FunctionSignature,
    constraints: &[Constraint],
    only_once: bool,
) -> Result<Vec<ParameterRule>> {
    let dynamic_count = function
        .params
        .iter()
        .filter(|p| p.kind.is_dynamic())
        .count();
    if dynamic_count > 1 {
        return Err(Error::Unsupported(format!(
            "{} declares {dynamic_count} dynamic parameters; at most one is supported",
            function.canonical()
        )));
    }

    let mut rules = Vec::new();

    // Rule 0: the 4-byte selector at offset 0
    let mut selector_word = [0u8; 32];
    selector_word[..SELECTOR_MASK_BYTES].copy_from_slice(&function.selector());
    rules.push(ParameterRule {
        cumulative: only_once,
        operation: ParameterOperation::Equal,
        value: B256::from(selector_word),
        offset: 0,
        mask: mask_high(SELECTOR_MASK_BYTES),
    });

    let head_size = WORD * function.params.len();
    for constraint in constraints {
        let index = function.param_index(&constraint.param)?;
        let param = &function.params[index];
        let head_offset = SELECTOR_MASK_BYTES + WORD * index;

        match (&constraint.value, param.kind.is_dynamic()) {
            (ConstraintValue::Word(value), false) => {
                let mask = param.kind.mask();
                rules.push(ParameterRule {
                    cumulative: constraint.cumulative,
                    operation: constraint.operation,
                    value: *value & mask,
                    offset: head_offset,
                    mask,
                });
            }
            (ConstraintValue::Dynamic(value), true) => {
                if constraint.operation != ParameterOperation::Equal {
                    return Err(Error::Unsupported(
                        "dynamic parameters only support equality constraints".to_string(),
                    ));
                }
                // Pointer to the tail, relative to the start of the arguments
                rules.push(ParameterRule {
                    cumulative: false,
                    operation: ParameterOperation::Equal,
                    value: word_from_u64(head_size as u64),
                    offset: head_offset,
                    mask: mask_high(WORD),
                });
                // Length word
                rules.push(ParameterRule {
                    cumulative: false,
                    operation: ParameterOperation::Equal,
                    value: word_from_u64(value.len() as u64),
                    offset: SELECTOR_MASK_BYTES + head_size,
                    mask: mask_high(WORD),
                });
                // Chunked value
                rules.extend(chunk_rules(
                    value,
                    SELECTOR_MASK_BYTES + head_size + WORD,
                    false,
                ));
            }
            (ConstraintValue::Word(_), true) => {
                return Err(Error::InvalidPermission(format!(
                    "parameter '{}' is dynamic; use where_data_equal",
                    constraint.param
                )));
            }
            (ConstraintValue::Dynamic(_), false) => {
                return Err(Error::InvalidPermission(format!(
                    "parameter '{}' is static; use a word constraint",
                    constraint.param
                )));
            }
        }
    }

    Ok(rules)
}

// ============================================================================
// Signature parsing
// ============================================================================

fn parse_function(signature: &str) -> Result<FunctionSignature> {
    let trimmed = signature.trim();
    let trimmed = trimmed.strip_prefix("function ").unwrap_or(trimmed).trim();

    let open = trimmed.find('(').ok_or_else(|| {
        Error::InvalidPermission(format!("missing '(' in function signature '{signature}'"))
    })?;
    let close = trimmed.find(')').ok_or_else(|| {
        Error::InvalidPermission(format!("missing ')' in function signature '{signature}'"))
    })?;
    if close < open {
        return Err(Error::InvalidPermission(format!(
            "malformed function signature '{signature}'"
        )));
    }

    let name = trimmed[..open].trim();
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(Error::InvalidPermission(format!(
            "invalid function name in '{signature}'"
        )));
    }

    let args = trimmed[open + 1..close].trim();
    let mut params = Vec::new();
    if !args.is_empty() {
        for arg in args.split(',') {
            params.push(parse_param(arg.trim())?);
        }
    }

    Ok(FunctionSignature {
        name: name.to_string(),
        params,
    })
}

fn parse_param(arg: &str) -> Result<Param> {
    let mut tokens = arg.split_whitespace();
    let kind_token = tokens
        .next()
        .ok_or_else(|| Error::InvalidPermission("empty parameter".to_string()))?;
    // Skip data-location modifiers, keep a trailing name if present
    let name = tokens
        .filter(|t| !matches!(*t, "memory" | "calldata" | "storage" | "indexed"))
        .next_back()
        .map(str::to_string);

    Ok(Param {
        name,
        kind: parse_param_type(kind_token)?,
    })
}

fn parse_param_type(token: &str) -> Result<ParamType> {
    match token {
        "address" => return Ok(ParamType::Address),
        "bool" => return Ok(ParamType::Bool),
        "bytes" => return Ok(ParamType::Bytes),
        "string" => return Ok(ParamType::String),
        "uint" => return Ok(ParamType::Uint(256)),
        "int" => return Ok(ParamType::Int(256)),
        _ => {}
    }
    if let Some(bits) = token.strip_prefix("uint") {
        let bits: u16 = bits
            .parse()
            .map_err(|_| Error::InvalidPermission(format!("invalid type '{token}'")))?;
        if bits == 0 || bits > 256 || bits % 8 != 0 {
            return Err(Error::InvalidPermission(format!("invalid type '{token}'")));
        }
        return Ok(ParamType::Uint(bits));
    }
    if let Some(bits) = token.strip_prefix("int") {
        let bits: u16 = bits
            .parse()
            .map_err(|_| Error::InvalidPermission(format!("invalid type '{token}'")))?;
        if bits == 0 || bits > 256 || bits % 8 != 0 {
            return Err(Error::InvalidPermission(format!("invalid type '{token}'")));
        }
        return Ok(ParamType::Int(bits));
    }
    if let Some(size) = token.strip_prefix("bytes") {
        let size: u8 = size
            .parse()
            .map_err(|_| Error::InvalidPermission(format!("invalid type '{token}'")))?;
        if size == 0 || size > 32 {
            return Err(Error::InvalidPermission(format!("invalid type '{token}'")));
        }
        return Ok(ParamType::FixedBytes(size));
    }
    Err(Error::Unsupported(format!(
        "unsupported parameter type '{token}'"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::word_from_address;

    fn target() -> Address {
        Address::repeat_byte(0x70)
    }

    fn transfer_calldata(to: Address, amount: U256) -> Bytes {
        let mut data = Vec::new();
        data.extend_from_slice(&selector("transfer(address,uint256)"));
        data.extend_from_slice(word_from_address(to).as_slice());
        data.extend_from_slice(&amount.to_be_bytes::<32>());
        Bytes::from(data)
    }

    #[test]
    fn test_for_function_selector_rule() {
        let permission = PermissionBuilder::for_target(target())
            .for_function("function transfer(address to, uint256 amount)")
            .build()
            .unwrap();

        let rule = &permission.rules[0];
        assert_eq!(rule.offset, 0);
        assert_eq!(rule.mask, mask_high(4));
        assert_eq!(&rule.value[..4], &selector("transfer(address,uint256)"));
        assert!(!rule.cumulative);
    }

    #[test]
    fn test_named_constraint_matches_calls() {
        let to = Address::repeat_byte(0x11);
        let permission = PermissionBuilder::for_target(target())
            .for_function("function transfer(address to, uint256 amount)")
            .where_equal("to", word_from_address(to))
            .where_less_or_equal("amount", U256::from(100u64))
            .build()
            .unwrap();

        let ok = Call::new(target(), U256::ZERO, transfer_calldata(to, U256::from(99u64)));
        assert!(permission.matches_call(&ok));

        let too_much = Call::new(target(), U256::ZERO, transfer_calldata(to, U256::from(101u64)));
        assert!(!permission.matches_call(&too_much));

        let wrong_recipient = Call::new(
            target(),
            U256::ZERO,
            transfer_calldata(Address::repeat_byte(0x22), U256::from(1u64)),
        );
        assert!(!permission.matches_call(&wrong_recipient));

        let wrong_target = Call::new(
            Address::repeat_byte(0x99),
            U256::ZERO,
            transfer_calldata(to, U256::from(1u64)),
        );
        assert!(!permission.matches_call(&wrong_target));
    }

    #[test]
    fn test_build_without_mode_is_rejected() {
        let err = PermissionBuilder::for_target(target()).build().unwrap_err();
        assert!(matches!(err, Error::InvalidPermission(_)));
    }

    #[test]
    fn test_mixing_allow_all_with_constraints_is_rejected() {
        let err = PermissionBuilder::for_target(target())
            .allow_all()
            .where_equal("0", B256::ZERO)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidPermission(_)));
    }

    #[test]
    fn test_two_dynamic_parameters_are_unsupported() {
        let err = PermissionBuilder::for_target(target())
            .for_function("function post(bytes data, string memo)")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }

    #[test]
    fn test_dynamic_parameter_rules() {
        let payload = Bytes::from_static(b"hello world, this is longer than one chunk....!!");
        let permission = PermissionBuilder::for_target(target())
            .for_function("function post(uint256 id, bytes data)")
            .where_data_equal("data", payload.clone())
            .build()
            .unwrap();

        // Build matching calldata by hand: selector, id, pointer, length, tail
        let mut data = Vec::new();
        data.extend_from_slice(&selector("post(uint256,bytes)"));
        data.extend_from_slice(&U256::from(7u64).to_be_bytes::<32>());
        data.extend_from_slice(word_from_u64(64).as_slice());
        data.extend_from_slice(word_from_u64(payload.len() as u64).as_slice());
        data.extend_from_slice(&payload);
        data.resize(4 + 64 + 32 + payload.len().div_ceil(32) * 32, 0);

        let call = Call::new(target(), U256::ZERO, Bytes::from(data.clone()));
        assert!(permission.matches_call(&call));

        // Flip one byte of the tail
        let last = data.len() - 40;
        data[last] ^= 0xff;
        let call = Call::new(target(), U256::ZERO, Bytes::from(data));
        assert!(!permission.matches_call(&call));
    }

    #[test]
    fn test_only_once_marks_selector_rule_cumulative() {
        let permission = PermissionBuilder::for_target(target())
            .for_function("function ping()")
            .only_once()
            .build()
            .unwrap();
        assert!(permission.rules[0].cumulative);
    }

    #[test]
    fn test_exact_calldata_round_trip() {
        let data = Bytes::from_static(&[0xaa; 40]);
        let permission = PermissionBuilder::for_target(target())
            .exact_calldata(data.clone())
            .build()
            .unwrap();

        assert!(permission.matches_call(&Call::new(target(), U256::ZERO, data)));
        assert!(!permission.matches_call(&Call::new(
            target(),
            U256::ZERO,
            Bytes::from_static(&[0xab; 40])
        )));
    }

    #[test]
    fn test_positional_constraint_on_unnamed_parameter() {
        let permission = PermissionBuilder::for_target(target())
            .for_function("transfer(address,uint256)")
            .where_less_or_equal("1", U256::from(5u64))
            .build()
            .unwrap();
        assert_eq!(permission.rules.len(), 2);
    }

    #[test]
    fn test_packed_encoding_round_trip() {
        let permission = PermissionBuilder::for_target(target())
            .for_function("function transfer(address to, uint256 amount)")
            .where_equal("to", word_from_address(Address::repeat_byte(0x11)))
            .where_cumulative("amount", U256::from(1_000u64))
            .build()
            .unwrap();

        let encoded = permission.encode_packed();
        let (decoded, consumed) = Permission::decode_packed(&encoded).unwrap();
        assert_eq!(consumed, encoded.len());
        assert_eq!(decoded, permission);
    }

    #[test]
    fn test_usage_hash_distinguishes_rules() {
        let permission = PermissionBuilder::for_target(target())
            .for_function("transfer(address,uint256)")
            .build()
            .unwrap();
        let signer = Address::repeat_byte(0x01);
        assert_ne!(
            usage_hash(signer, &permission, 0),
            usage_hash(signer, &permission, 1)
        );
    }
}
