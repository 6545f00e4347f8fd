pub mod balancer;
pub mod entities;
