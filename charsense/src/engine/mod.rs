pub mod detector;
pub mod dispatcher;
