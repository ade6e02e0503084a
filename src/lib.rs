// KuCoin Order Book Maintainer
// Live multi-symbol book reconstruction with change notifications over UNIX datagrams

pub mod core;
pub mod layer1;
pub mod layer2;

pub use layer2::maintainer::OrderBookMaintainer;
