mod deploy;
mod reset;
mod status;

pub use deploy::cmd_deploy;
pub use reset::cmd_reset;
pub use status::cmd_status;
