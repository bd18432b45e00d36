mod config_flow_test;
mod session_flow_test;
mod update_chain_test;
