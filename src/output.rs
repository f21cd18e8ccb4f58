use std::io::{self, Write};

use serde::Serialize;

use crate::app::{RecentUrlsResult, SpecializeResult, StudyDataObjects, TagResult, UploadResult};
use crate::pipeline::PipelineFindResponse;
use crate::query::FindResponse;
use crate::registration::{BatchRegistration, BatchSubmission, RegistrationOutcome};

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_find(result: &FindResponse) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_pipeline(result: &PipelineFindResponse) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_study(result: &StudyDataObjects) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_registration(result: &RegistrationOutcome) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_batch(result: &[BatchRegistration]) -> io::Result<()> {
        Self::print_json(&result)
    }

    pub fn print_submissions(result: &[BatchSubmission]) -> io::Result<()> {
        Self::print_json(&result)
    }

    pub fn print_tags(result: &TagResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_upload(result: &UploadResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_specialized(result: &SpecializeResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_recent(result: &RecentUrlsResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize + ?Sized>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout().lock();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}
