pub mod accounts;
pub mod quota;
pub mod sweeps;
