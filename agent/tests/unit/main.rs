//! Integration tests for the deployment runtime

mod fakes;
mod test_bindings;
mod test_csv_log;
mod test_formatter;
mod test_fsm;
mod test_label_check;
mod test_orchestrator;
