pub mod feed;
pub mod prelude;

pub use bondgraph_core as core;
pub use bondgraph_livepeer as livepeer;
pub use bondgraph_redb as redb;
