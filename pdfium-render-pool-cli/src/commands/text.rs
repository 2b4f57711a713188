//! extract-text: every selected page into one UTF-32LE file

use super::JobOptions;
use anyhow::Result;
use clap::Args;
use pdfium_render_pool::{Operation, RenderJob};

#[derive(Args, Debug)]
pub struct ExtractTextCommand {
    #[command(flatten)]
    options: JobOptions,
}

impl ExtractTextCommand {
    pub fn execute(self, log_filter: &str) -> Result<i32> {
        super::run(Operation::ExtractText, &self.options, RenderJob::default(), log_filter)
    }
}
