pub mod monitors;

pub use monitors::router;
