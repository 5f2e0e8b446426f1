pub mod airtel;
pub mod mpesa;
pub mod tigo;

pub use airtel::{AirtelConfig, AirtelProvider};
pub use mpesa::{MpesaConfig, MpesaProvider};
pub use tigo::{TigoConfig, TigoProvider};
