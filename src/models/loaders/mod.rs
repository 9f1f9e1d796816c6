//! 数据源加载器

pub mod sheet_loader;

pub use sheet_loader::{
    build_keywords, column_index, enumerate, parse_columns, parse_search_columns, rows_in_range,
    SearchColumn, SheetGrid, WorkSource,
};
