//! Neural building blocks shared by the encoder, decoder and post-net.

pub mod attention;
pub mod cbhg;
pub mod conv;
pub mod gru;
pub mod highway;
pub mod prenet;
