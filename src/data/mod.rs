/// Data layer: catalog types, loading, quality cuts and output.
///
/// Architecture:
/// ```text
///  .fits / .parquet / .csv
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  read requested columns → Catalog
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  filter   │  rules table: flags → validity → drop flags → label cuts
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  writer   │  Catalog → Parquet
///   └──────────┘
/// ```

pub mod fits;
pub mod filter;
pub mod loader;
pub mod model;
pub mod rules;
pub mod writer;
