pub mod alert;
pub mod record;
pub mod uid;
