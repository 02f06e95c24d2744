mod policy;

pub use policy::{AccessPolicy, MethodClass, ReadPolicy, Target};
