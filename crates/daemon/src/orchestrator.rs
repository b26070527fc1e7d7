use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use log::{debug, info};
use serde::Serialize;
use crate::backup::BackupRunner;
use crate::config::{ConfigError, ConvertConfig, DaemonConfig};
use crate::convert::Transcoder;
use crate::pipeline::{Pipeline, PipelineError};
use crate::scan;
use crate::status::{ProcessedDatabase, StoreError};
use crate::tools::ToolLocations;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Movie,
    Tv,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Movie => f.write_str("movie"),
            Category::Tv => f.write_str("tv"),
        }
    }
}

/// Counters for one category in one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CategoryReport {
    /// Files the pipeline actually worked on, successful or not
    pub processed: u32,
    /// Every media file found in the input tree
    pub total: u32,
    pub errors: u32,
}

/// Outcome of a full library pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub movie_processed: u32,
    pub movie_total: u32,
    pub movie_errors: u32,
    pub tv_processed: u32,
    pub tv_total: u32,
    pub tv_errors: u32,
}

impl RunReport {
    fn record(&mut self, category: Category, report: CategoryReport) {
        match category {
            Category::Movie => {
                self.movie_processed = report.processed;
                self.movie_total = report.total;
                self.movie_errors = report.errors;
            }
            Category::Tv => {
                self.tv_processed = report.processed;
                self.tv_total = report.total;
                self.tv_errors = report.errors;
            }
        }
    }

    pub fn category(&self, category: Category) -> CategoryReport {
        match category {
            Category::Movie => CategoryReport {
                processed: self.movie_processed,
                total: self.movie_total,
                errors: self.movie_errors,
            },
            Category::Tv => CategoryReport {
                processed: self.tv_processed,
                total: self.tv_total,
                errors: self.tv_errors,
            },
        }
    }
}

struct LibrarySource {
    category: Category,
    input_dir: PathBuf,
    output_dir: PathBuf,
    config: ConvertConfig,
}

/// Walks the movie and TV trees and drives the pipeline over every file, sequentially
pub struct Orchestrator {
    store: ProcessedDatabase,
    pipeline: Pipeline,
    sources: Vec<LibrarySource>,
    working_dir: PathBuf,
}

impl Orchestrator {
    pub fn new(cfg: &DaemonConfig, tools: ToolLocations, store: ProcessedDatabase) -> Result<Self, ConfigError> {
        cfg.transcode.movie.validate()?;
        cfg.transcode.tv.validate()?;

        let dirs = &cfg.directories;
        let backup = BackupRunner::new(&tools, &cfg.backup, &dirs.working);
        let transcoder = Transcoder::new(tools, Some(cfg.transcode.timeout_secs));
        let pipeline = Pipeline::new(
            backup,
            transcoder,
            cfg.transcode.interlace_frames,
            Duration::from_secs(cfg.transcode.recency_grace_secs),
        );

        let sources = vec![
            LibrarySource {
                category: Category::Movie,
                input_dir: dirs.movie_in.clone(),
                output_dir: dirs.movie_out.clone(),
                config: cfg.transcode.movie.clone(),
            },
            LibrarySource {
                category: Category::Tv,
                input_dir: dirs.tv_in.clone(),
                output_dir: dirs.tv_out.clone(),
                config: cfg.transcode.tv.clone(),
            },
        ];

        Ok(Self {
            store,
            pipeline,
            sources,
            working_dir: dirs.working.clone(),
        })
    }

    pub fn store(&self) -> &ProcessedDatabase {
        &self.store
    }

    pub async fn run(&self) -> Result<RunReport, StoreError> {
        self.run_at(SystemTime::now()).await
    }

    /// One pass over both libraries; per-file failures are counted, store failures abort
    pub async fn run_at(&self, now: SystemTime) -> Result<RunReport, StoreError> {
        info!("Starting new run");
        let mut report = RunReport::default();

        for source in &self.sources {
            let files = scan::library_files(&source.input_dir, &source.output_dir, &self.working_dir);
            let mut counts = CategoryReport {
                total: files.len() as u32,
                ..Default::default()
            };

            for file in &files {
                match self
                    .pipeline
                    .process_file(&self.store, &source.input_dir, file, &source.config, now)
                    .await
                {
                    Ok(_) => counts.processed += 1,
                    Err(PipelineError::Skip(reason)) => {
                        debug!("Skipped {}: {}", file.input.display(), reason);
                    }
                    Err(PipelineError::RetryableFailure { phase, cause }) => {
                        debug!("{} left for retry after {} failure: {}", file.input.display(), phase, cause);
                        counts.processed += 1;
                        counts.errors += 1;
                    }
                    Err(PipelineError::Fatal(e)) => return Err(e),
                }
            }

            info!(
                "Finished {} library: {} processed, {} errors, {} total",
                source.category, counts.processed, counts.errors, counts.total
            );
            report.record(source.category, counts);
        }

        info!("Run complete: {:?}", report);
        Ok(report)
    }
}
