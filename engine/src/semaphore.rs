//! C8 — Resource Semaphores: independent counting semaphores keyed by
//! resource class, so a VM uploading never blocks another converting.
//! `per_esxi_host` is a namespaced family, one semaphore per host name,
//! created lazily.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::plan::ConcurrencyCaps;

/// The five resource classes, plus the namespaced `per_esxi_host:{host}`
/// family.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceClass {
    Global,
    PerEsxiHost(String),
    DiskIo,
    S3Upload,
    ScwApi,
}

impl ResourceClass {
    /// Fixed global acquisition order, applied within a single stage, to
    /// prevent deadlock: global, per_esxi_host, disk_io, s3_upload, scw_api.
    fn order_rank(&self) -> u8 {
        match self {
            ResourceClass::Global => 0,
            ResourceClass::PerEsxiHost(_) => 1,
            ResourceClass::DiskIo => 2,
            ResourceClass::S3Upload => 3,
            ResourceClass::ScwApi => 4,
        }
    }
}

pub struct SemaphoreRegistry {
    global: Arc<Semaphore>,
    disk_io: Arc<Semaphore>,
    s3_upload: Arc<Semaphore>,
    scw_api: Arc<Semaphore>,
    per_esxi_host: std::sync::Mutex<HashMap<String, Arc<Semaphore>>>,
    per_esxi_host_cap: usize,
}

impl SemaphoreRegistry {
    pub fn new(caps: &ConcurrencyCaps) -> Self {
        Self {
            global: Arc::new(Semaphore::new(caps.global as usize)),
            disk_io: Arc::new(Semaphore::new(caps.disk_io as usize)),
            s3_upload: Arc::new(Semaphore::new(caps.s3_upload as usize)),
            scw_api: Arc::new(Semaphore::new(caps.scw_api as usize)),
            per_esxi_host: std::sync::Mutex::new(HashMap::new()),
            per_esxi_host_cap: caps.per_esxi_host as usize,
        }
    }

    fn host_semaphore(&self, host: &str) -> Arc<Semaphore> {
        let mut map = self.per_esxi_host.lock().unwrap();
        map.entry(host.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_esxi_host_cap)))
            .clone()
    }

    fn semaphore_for(&self, class: &ResourceClass) -> Arc<Semaphore> {
        match class {
            ResourceClass::Global => self.global.clone(),
            ResourceClass::PerEsxiHost(host) => self.host_semaphore(host),
            ResourceClass::DiskIo => self.disk_io.clone(),
            ResourceClass::S3Upload => self.s3_upload.clone(),
            ResourceClass::ScwApi => self.scw_api.clone(),
        }
    }

    /// Acquire every class a stage declares, always in the fixed order
    /// (`global, per_esxi_host, disk_io, s3_upload, scw_api`), regardless of
    /// the order the caller lists them in.
    pub async fn acquire_many(&self, classes: &[ResourceClass]) -> StageGuard {
        let mut sorted: Vec<&ResourceClass> = classes.iter().collect();
        sorted.sort_by_key(|c| c.order_rank());

        let mut permits = Vec::with_capacity(sorted.len());
        for class in sorted {
            let sem = self.semaphore_for(class);
            // SAFETY-free: `forget`-free leak avoided by storing the Arc
            // alongside the permit so the semaphore outlives it.
            let owned = sem.clone().acquire_owned().await.expect("semaphore closed");
            permits.push(owned);
        }
        StageGuard { _permits: permits }
    }
}

/// RAII guard: dropping it releases every permit the stage acquired.
pub struct StageGuard {
    _permits: Vec<tokio::sync::OwnedSemaphorePermit>,
}
