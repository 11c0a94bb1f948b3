// src/models/mod.rs

pub mod attempt;
pub mod chapter;
pub mod otp;
pub mod progress;
pub mod quiz;
pub mod topic;
pub mod user;
