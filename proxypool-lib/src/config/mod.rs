pub mod convert;
pub mod def;
pub mod descriptor;
pub mod internal;
