mod config;
mod lock;
