pub mod builders;
pub mod clock;
pub mod db;

pub use builders::{ConsentBuilder, UserBuilder};
pub use clock::ManualClock;
pub use db::{TestApp, TestDb};
