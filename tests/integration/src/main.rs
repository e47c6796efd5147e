//! End-to-end tests that drive a real `cinder-server` process over
//! websockets. Run with `cargo test -p cinder-integration` after building
//! the server binary.

#[cfg(test)]
mod helpers;

#[cfg(test)]
mod commands;
#[cfg(test)]
mod lifecycle;
#[cfg(test)]
mod watch;

fn main() {}
