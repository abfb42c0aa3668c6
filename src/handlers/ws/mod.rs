mod handler;

pub use handler::ws_agent_handler;
