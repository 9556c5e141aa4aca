mod impls;

pub use impls::*;
