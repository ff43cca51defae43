use crate::classifier::Intent;
use crate::config::Config;
use crate::delivery::DeliveryRouter;
use crate::errors::{Result, RetrievalError};
use crate::manifest::Manifest;
use crate::metrics_defs::{INVARIANT_VIOLATIONS, NOTICES_FAILED};
use crate::orchestrator::{JobSet, Orchestrator};
use crate::query::QueryBuilder;
use crate::store::ObjectStore;
use crate::types::{RetrievalJob, RetrievalRequest};
use shared::counter;
use std::sync::Arc;

/// Request-level half of the pipeline: manifest, job derivation, dispatch.
pub struct Pipeline {
    config: Arc<Config>,
    objects: Arc<dyn ObjectStore>,
    delivery: Arc<DeliveryRouter>,
    orchestrator: Orchestrator,
}

impl Pipeline {
    pub fn new(
        config: Arc<Config>,
        objects: Arc<dyn ObjectStore>,
        delivery: Arc<DeliveryRouter>,
        orchestrator: Orchestrator,
    ) -> Self {
        Pipeline {
            config,
            objects,
            delivery,
            orchestrator,
        }
    }

    /// Runs a classified request up to dispatch and returns its job handles.
    pub async fn run(&self, request: Arc<RetrievalRequest>, intent: Intent) -> Result<JobSet> {
        // Record requests carry one filter shared by every job
        let filter = match intent {
            Intent::Rejected => return Err(RetrievalError::MalformedRequest),
            Intent::FileRetrieval => None,
            Intent::RecordRetrieval => Some(
                QueryBuilder::new(&self.config.extraction.schema)
                    .build(&request)
                    .inspect_err(|e| {
                        counter!(INVARIANT_VIOLATIONS).increment(1);
                        tracing::error!(error = %e, "record request produced no query");
                    })?,
            ),
        };

        let manifest = self.load_manifest().await;
        let matches = manifest.select(&request, self.config.manifest.date_window);
        tracing::info!(
            intent = intent.as_str(),
            manifest_entries = manifest.len(),
            matches = matches.len(),
            "manifest matched"
        );

        if matches.is_empty() {
            self.delivery.send_no_files_found(&request).await?;
            return Ok(JobSet::default());
        }

        let jobs = match filter {
            None => {
                // Files are pulled even when the listing cannot be sent
                if let Err(e) = self.delivery.send_file_list(&request, &matches).await {
                    counter!(NOTICES_FAILED, "notice" => "file_list").increment(1);
                    tracing::error!(
                        matches = matches.len(),
                        error = %e,
                        "could not send file list"
                    );
                }

                let bucket = &self.config.buckets.files;
                matches
                    .iter()
                    .map(|key| RetrievalJob::file(request.clone(), bucket, key))
                    .collect()
            }
            Some(filter) => {
                let bucket = &self.config.buckets.records;
                matches
                    .iter()
                    .map(|key| RetrievalJob::record(request.clone(), bucket, key, filter.clone()))
                    .collect()
            }
        };

        Ok(self.orchestrator.dispatch_all(jobs))
    }

    /// An unreadable manifest is treated as an empty one.
    async fn load_manifest(&self) -> Manifest {
        let manifest = &self.config.manifest;
        match self.objects.get(&manifest.bucket, &manifest.key).await {
            Ok(body) => Manifest::parse(&String::from_utf8_lossy(&body)),
            Err(e) => {
                let err = RetrievalError::ManifestUnavailable(e);
                tracing::error!(
                    bucket = %manifest.bucket,
                    key = %manifest.key,
                    error = %err,
                    "treating manifest as empty"
                );
                Manifest::default()
            }
        }
    }
}
