mod commands;

pub use commands::{Cli, Commands, PermissionCommands, TokenCommands, UserCommands};
