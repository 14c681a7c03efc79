pub mod constant_folding;
pub mod dce;
pub mod mov_tunneling;
pub mod simplify;
