pub mod command;
pub mod game_state;
pub mod run_loop;
pub mod subsystem;
pub mod worker;
