mod bq_client;
mod models;
mod transport;

pub use bq_client::BqClient;
pub use models::{
    ErrorProto, JobConfiguration, JobConfigurationQuery, JobInsertRequest, JobReference,
    JobResponse, JobState, JobStatus, QueryResultsResponse, TableCell, TableFieldSchema,
    TableReference, TableRow, TableSchema, WRITE_TRUNCATE,
};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, Method, MockTransport, Transport};
