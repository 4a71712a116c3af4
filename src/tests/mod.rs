mod execution;
mod shaping;
mod support;
