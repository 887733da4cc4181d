mod loader;
mod parser;
mod template;

pub use loader::QueryLoader;
pub use parser::{
    Pipeline, QueryDef, RawPipeline, RawQueryDef, RenderedQuery, OUTPUT_DATASET_PARAM,
};
pub use template::render;
