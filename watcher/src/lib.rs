pub mod annotate;
pub mod compare;
pub mod cycle;
pub mod keys;
pub mod motion;
pub mod recorder;
pub mod resolver;
pub mod sampler;
pub mod setup;
pub mod storage;
pub mod tracking;
pub mod trigger;
