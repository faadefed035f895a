//! Drift Client
//!
//! Synchronous facade over a device's services. Construction selects the blob
//! store once; every historical call is marshaled onto the client's
//! [`Executor`] and blocks until it completes. Live data goes through the
//! [`Transport`].

use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, ConfigError};
use crate::error::{DriftError, DriftResult};
use crate::executor::Executor;
use crate::index::{pivot_series, FieldSelection, InfluxIndex, MetricRecord, TimeIndex};
use crate::package::{DriftPackage, PackageId};
use crate::resolver::Resolver;
use crate::store::{select, Backend, Candidate, ReductStore, S3Store};
use crate::time::{TimeInput, TimeRange};
use crate::transport::{Link, MqttLink, QualityOfService, Transport};
use crate::walker::Walker;

/// Client for one device
pub struct DriftClient<L: Link = MqttLink> {
    executor: Arc<Executor>,
    index: Arc<dyn TimeIndex>,
    backend: Arc<Backend>,
    resolver: Resolver,
    transport: Transport<L>,
    query_ttl: Duration,
}

impl DriftClient<MqttLink> {
    /// Connect to the device described by `config`
    ///
    /// Fails with [`DriftError::BackendUnavailable`] when neither ReductStore
    /// nor MinIO answers. The broker is not contacted until first use.
    pub fn connect(config: Config) -> DriftResult<Self> {
        config.validate()?;

        let executor = Arc::new(Executor::new(config.connection.io_threads)?);
        let index = InfluxIndex::new(config.influx_config())
            .map_err(|e| ConfigError::Invalid(format!("time index client: {e}")))?;

        let reduct = config.reduct_config();
        let s3 = config.s3_config();
        let candidates = vec![
            Candidate::new("reductstore", move || {
                Ok(Backend::Indexed(Box::new(ReductStore::new(reduct)?)))
            }),
            Candidate::new("s3", move || Ok(Backend::Basic(Box::new(S3Store::new(s3)?)))),
        ];
        let backend = executor.run(select(candidates, config.probe_timeout()))?;

        let link = MqttLink::new(&config.mqtt_link_config())?;
        let transport = Transport::new(link, config.transport_config());

        tracing::info!(
            host = %config.connection.host,
            backend = backend.name(),
            "Drift client ready"
        );
        Ok(Self::from_parts(
            executor,
            Arc::new(index),
            backend,
            transport,
            config.query_ttl(),
        ))
    }
}

impl<L: Link> DriftClient<L> {
    /// Assemble a client from already constructed collaborators
    pub fn from_parts(
        executor: Arc<Executor>,
        index: Arc<dyn TimeIndex>,
        backend: Backend,
        transport: Transport<L>,
        query_ttl: Duration,
    ) -> Self {
        let backend = Arc::new(backend);
        let resolver = Resolver::new(Arc::clone(&index), Arc::clone(&backend));

        Self {
            executor,
            index,
            backend,
            resolver,
            transport,
            query_ttl,
        }
    }

    /// Name of the blob store selected at construction
    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn transport(&self) -> &Transport<L> {
        &self.transport
    }

    /// Topics known to the time index
    pub fn get_topics(&self) -> DriftResult<Vec<String>> {
        let index = Arc::clone(&self.index);
        self.executor.run(async move {
            index
                .query_topics()
                .await
                .map_err(|e| DriftError::ResolutionFailed(format!("listing topics: {e}")))
        })
    }

    /// Identifiers of the packages of `topic` the store holds in `[start, stop]`
    pub fn get_package_names(
        &self,
        topic: &str,
        start: impl Into<TimeInput>,
        stop: impl Into<TimeInput>,
    ) -> DriftResult<Vec<PackageId>> {
        let range = TimeRange::new(start, stop)?;
        let resolver = self.resolver.clone();
        let topic = topic.to_string();

        self.executor.run(async move {
            resolver
                .resolve(&topic, &range, &FieldSelection::default())
                .await
        })
    }

    /// Fetch and decode one package
    pub fn get_item(&self, id: &str) -> DriftResult<DriftPackage> {
        let id: PackageId = id.parse()?;
        let backend = Arc::clone(&self.backend);

        let blob = self.executor.run(async move {
            backend.fetch(&id).await.map_err(|e| DriftError::FetchFailed {
                id: id.to_string(),
                reason: e.to_string(),
            })
        })?;

        DriftPackage::decode(blob)
    }

    /// Metric records of `topic` in `[start, stop]`, one per timestamp
    ///
    /// `names = None` selects every field of the topic.
    pub fn get_metrics(
        &self,
        topic: &str,
        start: impl Into<TimeInput>,
        stop: impl Into<TimeInput>,
        names: Option<Vec<String>>,
    ) -> DriftResult<Vec<MetricRecord>> {
        let range = TimeRange::new(start, stop)?;
        let fields = FieldSelection::from_names(names);
        let index = Arc::clone(&self.index);
        let topic = topic.to_string();

        let series = self.executor.run(async move {
            index
                .query_data(&topic, &range, &fields)
                .await
                .map_err(|e| DriftError::ResolutionFailed(format!("metrics of {topic}: {e}")))
        })?;

        Ok(pivot_series(series))
    }

    /// Lazily iterate over the package bodies of `topic` in a range
    pub fn walk(
        &self,
        topic: &str,
        start: impl Into<TimeInput>,
        stop: impl Into<TimeInput>,
    ) -> DriftResult<Walker> {
        self.walk_with_ttl(topic, start, stop, self.query_ttl)
    }

    /// Like [`walk`](Self::walk) with an explicit query session lifetime
    pub fn walk_with_ttl(
        &self,
        topic: &str,
        start: impl Into<TimeInput>,
        stop: impl Into<TimeInput>,
        ttl: Duration,
    ) -> DriftResult<Walker> {
        let range = TimeRange::new(start, stop)?;
        Walker::open(
            Arc::clone(&self.executor),
            Arc::clone(&self.backend),
            topic,
            &range,
            ttl,
        )
    }

    /// Deliver every live package under `topic` to `handler`
    ///
    /// Blocks the calling thread until [`stop`](Self::stop) or until the
    /// broker link closes. Payloads that are not packages are logged and
    /// skipped.
    pub fn subscribe_data<F>(&self, topic: &str, handler: F) -> DriftResult<()>
    where
        F: Fn(DriftPackage) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.transport.connect()?;
        self.transport
            .subscribe(topic, QualityOfService::AtMostOnce, move |message| {
                match DriftPackage::decode(message.payload.clone()) {
                    Ok(package) => handler(package),
                    Err(e) => {
                        tracing::warn!(topic = %message.topic, error = %e, "Payload is not a drift package");
                        Ok(())
                    }
                }
            });

        self.transport.loop_forever()?;
        Ok(())
    }

    /// Publish raw bytes to `topic`
    pub fn publish_data(&self, topic: &str, payload: &[u8]) -> DriftResult<()> {
        self.transport.publish(topic, payload)?;
        Ok(())
    }

    /// Stop live delivery and disconnect from the broker
    pub fn stop(&self) {
        self.transport.stop();
    }
}
