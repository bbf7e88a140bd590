pub mod alarm;
pub mod conversion;
pub mod currency;
pub mod rates;
