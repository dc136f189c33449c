pub mod csv_output_adapter;
pub mod http_client;
