// Real3D CLI library
pub mod commands;
