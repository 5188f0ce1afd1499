// 命令模块

pub mod config;
pub mod pipeline;
pub mod system;
