use super::ExportedTexture;
use crate::render::provider::{HostTexture, TextureDesc};
use crate::task_suspender::TaskSuspender;
use futures::FutureExt;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;

/// Identity of a host texture. Only meaningful while the texture is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct TextureKey(usize);

impl TextureKey {
    fn of(texture: &Arc<dyn HostTexture>) -> Self {
        Self(Arc::as_ptr(texture) as *const () as usize)
    }
}

#[derive(Debug)]
struct Pool {
    host: Weak<dyn HostTexture>,
    exported: Arc<ExportedTexture>,
    parameters: HashSet<String>,
}

/// Result of a cache lookup.
#[derive(Debug)]
pub struct PooledTexture {
    pub exported: Arc<ExportedTexture>,
    /// False when the existing contents were reused as is.
    pub needs_copy: bool,
    pub newly_created: bool,
}

/// Shared textures per host texture and parameter.
///
/// Host textures are held weakly. A parameter bound to a new host texture
/// drops its claim on the old one; a shared texture nobody claims anymore
/// is released.
#[derive(Debug)]
pub struct ExportedTextureCache {
    pools: HashMap<TextureKey, Pool>,
    last_texture_for_parameter: HashMap<String, TextureKey>,
    pending_releases: TaskSuspender,
    runtime: Handle,
}

impl ExportedTextureCache {
    pub fn new(runtime: Handle) -> Self {
        Self {
            pools: HashMap::new(),
            last_texture_for_parameter: HashMap::new(),
            pending_releases: TaskSuspender::new(),
            runtime,
        }
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    pub fn pending_releases(&self) -> usize {
        self.pending_releases.active_tasks()
    }

    /// Returns the shared texture `texture` should be copied into for `parameter`.
    ///
    /// `create` is only called when nothing cached fits.
    pub fn get_or_create(
        &mut self,
        parameter: &str,
        texture: &Arc<dyn HostTexture>,
        reuse_existing: bool,
        create: impl FnOnce(TextureDesc) -> anyhow::Result<Arc<ExportedTexture>>,
    ) -> anyhow::Result<PooledTexture> {
        let key = TextureKey::of(texture);
        let desc = texture.desc();

        self.release_dead_pools();

        if let Some(old_key) = self.last_texture_for_parameter.get(parameter).copied() {
            if old_key != key {
                self.remove_parameter_dependency(old_key, parameter);
            }
        }

        let pooled = match self.pools.get_mut(&key) {
            Some(pool) if reuse_existing && !pool.exported.is_released() => {
                pool.parameters.insert(parameter.to_string());
                PooledTexture { exported: pool.exported.clone(), needs_copy: false, newly_created: false }
            }
            Some(pool) if pool.exported.can_fit(&desc) && !pool.exported.is_in_use() => {
                pool.parameters.insert(parameter.to_string());
                PooledTexture { exported: pool.exported.clone(), needs_copy: true, newly_created: false }
            }
            Some(pool) => {
                let fresh = create(desc)?;
                let old = std::mem::replace(&mut pool.exported, fresh.clone());
                pool.parameters.insert(parameter.to_string());
                log::debug!("shared texture for '{parameter}' no longer fits or is in use, replacing it");
                self.schedule_release(old);
                PooledTexture { exported: fresh, needs_copy: true, newly_created: true }
            }
            None => {
                let fresh = create(desc)?;
                self.pools.insert(
                    key,
                    Pool {
                        host: Arc::downgrade(texture),
                        exported: fresh.clone(),
                        parameters: HashSet::from([parameter.to_string()]),
                    },
                );
                PooledTexture { exported: fresh, needs_copy: true, newly_created: true }
            }
        };

        self.last_texture_for_parameter.insert(parameter.to_string(), key);
        Ok(pooled)
    }

    /// Releases every cached texture. Resolves when the engine has let go of
    /// all of them, including textures dropped by earlier rounds.
    ///
    /// The cache stays usable; each call drains its own round of releases.
    pub fn release_all(&mut self) -> impl Future<Output = ()> + Send + 'static {
        self.last_texture_for_parameter.clear();
        let pools: Vec<Pool> = self.pools.drain().map(|(_, pool)| pool).collect();
        for pool in pools {
            self.schedule_release(pool.exported);
        }

        let round = std::mem::take(&mut self.pending_releases);
        let drained = round.suspend().shared();
        // The next round also waits for this one.
        let carry = self.pending_releases.start_task();
        let waited = drained.clone();
        self.runtime.spawn(async move {
            waited.await;
            drop(carry);
        });
        drained
    }

    fn remove_parameter_dependency(&mut self, key: TextureKey, parameter: &str) {
        let unclaimed = match self.pools.get_mut(&key) {
            Some(pool) => {
                pool.parameters.remove(parameter);
                pool.parameters.is_empty()
            }
            None => false,
        };
        if unclaimed {
            if let Some(pool) = self.pools.remove(&key) {
                self.schedule_release(pool.exported);
            }
        }
    }

    fn release_dead_pools(&mut self) {
        let dead: Vec<TextureKey> = self
            .pools
            .iter()
            .filter(|(_, pool)| pool.host.strong_count() == 0)
            .map(|(key, _)| *key)
            .collect();

        for key in dead {
            if let Some(pool) = self.pools.remove(&key) {
                self.last_texture_for_parameter.retain(|_, k| *k != key);
                self.schedule_release(pool.exported);
            }
        }
    }

    /// Keeps `exported` alive until the engine has released it.
    fn schedule_release(&self, exported: Arc<ExportedTexture>) {
        let token = self.pending_releases.start_task();
        let released = exported.release();
        self.runtime.spawn(async move {
            released.await;
            drop(exported);
            drop(token);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::provider::{PixelFormat, ResourceProvider};
    use crate::render::providers::null::{GpuOp, NullHostTexture, NullProvider};
    use crate::sdk::ObjectEvent;
    use std::time::Duration;

    fn host(w: u32, h: u32) -> Arc<dyn HostTexture> {
        NullHostTexture::new(TextureDesc::new(w, h, PixelFormat::Rgba8))
    }

    fn lookup(
        cache: &mut ExportedTextureCache,
        provider: &NullProvider,
        param: &str,
        texture: &Arc<dyn HostTexture>,
    ) -> PooledTexture {
        cache
            .get_or_create(param, texture, false, |desc| {
                Ok(ExportedTexture::new(provider.create_exported_texture(desc)?))
            })
            .unwrap()
    }

    fn created(provider: &NullProvider) -> usize {
        provider.count_ops(|op| matches!(op, GpuOp::CreateShared { .. }))
    }

    #[tokio::test]
    async fn same_texture_reuses_shared_resource() {
        let provider = NullProvider::new();
        let mut cache = ExportedTextureCache::new(Handle::current());
        let tex = host(64, 64);

        let first = lookup(&mut cache, &provider, "in1", &tex);
        let second = lookup(&mut cache, &provider, "in1", &tex);

        assert!(first.newly_created);
        assert!(!second.newly_created);
        assert!(Arc::ptr_eq(&first.exported, &second.exported));
        assert_eq!(created(&provider), 1);
    }

    #[tokio::test]
    async fn in_use_texture_is_not_overwritten() {
        let provider = NullProvider::new();
        let mut cache = ExportedTextureCache::new(Handle::current());
        let tex = host(64, 64);

        let first = lookup(&mut cache, &provider, "in1", &tex);
        let engine_side = provider.last_exported_te_texture().unwrap();
        engine_side.fire(ObjectEvent::BeginUse);

        let second = lookup(&mut cache, &provider, "in1", &tex);
        assert!(second.newly_created);
        assert!(!Arc::ptr_eq(&first.exported, &second.exported));
        assert_eq!(cache.pending_releases(), 1);

        drop(first);
        engine_side.fire(ObjectEvent::Release);
        tokio::time::timeout(Duration::from_secs(1), async {
            while cache.pending_releases() > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn reuse_existing_skips_the_copy() {
        let provider = NullProvider::new();
        let mut cache = ExportedTextureCache::new(Handle::current());
        let tex = host(32, 32);

        lookup(&mut cache, &provider, "in1", &tex);
        let again = cache
            .get_or_create("in1", &tex, true, |_| panic!("must not allocate"))
            .unwrap();
        assert!(!again.needs_copy);
    }

    #[tokio::test]
    async fn rebinding_a_parameter_releases_the_unclaimed_texture() {
        let provider = NullProvider::new();
        let mut cache = ExportedTextureCache::new(Handle::current());
        let a = host(32, 32);
        let b = host(32, 32);

        lookup(&mut cache, &provider, "in1", &a);
        lookup(&mut cache, &provider, "in1", &b);
        assert_eq!(cache.len(), 1);
        assert_eq!(created(&provider), 2);
    }

    #[tokio::test]
    async fn shared_host_texture_stays_while_claimed() {
        let provider = NullProvider::new();
        let mut cache = ExportedTextureCache::new(Handle::current());
        let a = host(32, 32);
        let b = host(32, 32);

        lookup(&mut cache, &provider, "in1", &a);
        lookup(&mut cache, &provider, "in2", &a);
        lookup(&mut cache, &provider, "in1", &b);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn dead_host_textures_are_not_kept_alive() {
        let provider = NullProvider::new();
        let mut cache = ExportedTextureCache::new(Handle::current());
        let a = host(32, 32);
        let weak = Arc::downgrade(&a);

        lookup(&mut cache, &provider, "in1", &a);
        drop(a);
        assert!(weak.upgrade().is_none());

        let b = host(16, 16);
        lookup(&mut cache, &provider, "in2", &b);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn release_all_waits_for_engine_release() {
        let provider = NullProvider::new();
        let mut cache = ExportedTextureCache::new(Handle::current());
        let tex = host(8, 8);

        let pooled = lookup(&mut cache, &provider, "in1", &tex);
        let engine_side = provider.last_exported_te_texture().unwrap();
        engine_side.fire(ObjectEvent::BeginUse);
        drop(pooled);

        let mut drained = Box::pin(cache.release_all());
        tokio::task::yield_now().await;
        assert!((&mut drained).now_or_never().is_none());

        engine_side.fire(ObjectEvent::Release);
        tokio::time::timeout(Duration::from_secs(1), drained).await.unwrap();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn every_release_round_waits_for_the_engine() {
        let provider = NullProvider::new();
        let mut cache = ExportedTextureCache::new(Handle::current());

        let first = host(8, 8);
        lookup(&mut cache, &provider, "in1", &first);
        tokio::time::timeout(Duration::from_secs(1), cache.release_all()).await.unwrap();

        let second = host(8, 8);
        let pooled = lookup(&mut cache, &provider, "in1", &second);
        assert!(pooled.newly_created);
        let engine_side = provider.last_exported_te_texture().unwrap();
        engine_side.fire(ObjectEvent::BeginUse);
        drop(pooled);

        let mut drained = Box::pin(cache.release_all());
        tokio::task::yield_now().await;
        assert!((&mut drained).now_or_never().is_none());

        engine_side.fire(ObjectEvent::Release);
        tokio::time::timeout(Duration::from_secs(1), drained).await.unwrap();
        assert!(cache.is_empty());
    }
}
