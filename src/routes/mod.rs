//! Route modules for Filedrop Server

pub mod health;
pub mod upload;
