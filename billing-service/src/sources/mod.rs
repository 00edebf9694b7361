pub mod http_json;
pub mod readings_csv_file;

pub use http_json::HttpJsonSource;
pub use readings_csv_file::ReadingsCsvFileSource;
