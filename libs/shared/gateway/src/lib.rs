pub mod client;

pub use client::HospitalClient;
