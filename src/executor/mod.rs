mod poller;
mod results;
mod runner;
mod submitter;

pub use poller::{Backoff, CancellationToken, CompletionPoller};
pub use results::{decode_results, decode_row, field_names, ResultFetcher, ResultRow, ResultSet};
pub use runner::{collect_in_order, run_in_order, QueryRunner};
pub use submitter::{build_job_request, Destination, JobSubmitter};
