//! The identity cache: at most one live object per normalized path.
//!
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, Weak};

use log::debug;
use parking_lot::{Condvar, Mutex};

use crate::{
    dataset::Dataset,
    errors::{Error, Result},
};

/// The cache datasets opened from paths go in
pub type DatasetCache = WeakCache<Dataset>;

/// A cache of weakly held objects, keyed by path.
///
/// The cache never keeps an object alive: once the last strong reference elsewhere is dropped
/// the entry is dead, and dead entries are pruned whenever a new object is inserted.
///
/// `get_or_create` is thread safe. If several threads ask for the same path at once, only one
/// builds the object; the rest wait for it and share the result. If the build fails, the
/// waiting threads get `Error::Load` and the building thread gets the original error.
///
pub struct WeakCache<V> {
    /// The cached objects
    entries: Mutex<HashMap<PathBuf, Weak<V>>>,

    /// Synchronization objects for paths whose objects are currently being built
    loaders: Mutex<HashMap<PathBuf, Arc<Loader<V>>>>,
}

/// Synchronizes the build of one object among all the threads waiting for it.
struct Loader<V> {
    /// `None` until the build is finished. Then `Some(None)` if it failed, or `Some(object)`.
    object: Mutex<Option<Option<Arc<V>>>>,

    finished: Condvar,
}

impl<V> WeakCache<V> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            loaders: Mutex::new(HashMap::new()),
        }
    }

    /// Get the live object for `path`, or build and cache one with `build`.
    ///
    pub fn get_or_create<F>(&self, path: &Path, build: F) -> Result<Arc<V>>
    where
        F: FnOnce() -> Result<Arc<V>>,
    {
        if let Some(object) = self.lookup(path) {
            debug!("Identity cache hit for {path:?}");
            return Ok(object);
        }

        let (first, loader) = {
            let mut loaders = self.loaders.lock();
            match loaders.get(path) {
                Some(loader) => (false, Arc::clone(loader)),
                None => {
                    let loader = Arc::new(Loader::new());
                    loaders.insert(path.to_path_buf(), Arc::clone(&loader));

                    (true, loader)
                }
            }
        };

        if !first {
            // Another thread is building this object already, just wait for it to finish
            return loader.wait(path);
        }

        let mut guard = LoadGuard {
            cache: self,
            path,
            loader: &loader,
            done: false,
        };

        // Another thread may have finished building between the lookup and taking the loader
        if let Some(object) = self.lookup(path) {
            guard.finish(Some(Arc::clone(&object)));
            return Ok(object);
        }

        match build() {
            Ok(object) => {
                self.insert(path, &object);
                guard.finish(Some(Arc::clone(&object)));

                Ok(object)
            }
            Err(err) => {
                guard.finish(None);

                Err(err)
            }
        }
    }

    /// Whether a live object is cached for `path`
    pub fn contains(&self, path: &Path) -> bool {
        self.lookup(path).is_some()
    }

    /// Number of entries, dead ones included
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn lookup(&self, path: &Path) -> Option<Arc<V>> {
        self.entries.lock().get(path).and_then(Weak::upgrade)
    }

    fn insert(&self, path: &Path, object: &Arc<V>) {
        let mut entries = self.entries.lock();
        entries.retain(|_, entry| entry.strong_count() > 0);
        entries.insert(path.to_path_buf(), Arc::downgrade(object));
    }
}

impl<V> Default for WeakCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl WeakCache<Dataset> {
    /// The process wide dataset cache
    pub fn global() -> Arc<DatasetCache> {
        static CACHE: OnceLock<Arc<DatasetCache>> = OnceLock::new();
        Arc::clone(CACHE.get_or_init(|| Arc::new(DatasetCache::new())))
    }
}

impl<V> Loader<V> {
    fn new() -> Self {
        Self {
            object: Mutex::new(None),
            finished: Condvar::new(),
        }
    }

    /// Inform any waiting threads that the object has been built, or the building thread has
    /// given up trying.
    ///
    fn finish(&self, object: Option<Arc<V>>) {
        *self.object.lock() = Some(object);
        self.finished.notify_all();
    }

    /// Wait for the building thread to finish building the object, or give up trying.
    fn wait(&self, path: &Path) -> Result<Arc<V>> {
        let mut object = self.object.lock();
        while object.is_none() {
            self.finished.wait(&mut object);
        }

        match &*object {
            Some(Some(object)) => Ok(Arc::clone(object)),
            _ => Err(Error::Load(path.to_path_buf())),
        }
    }
}

/// Makes sure waiters are released and the loader is removed, even if the build panics.
struct LoadGuard<'a, V> {
    cache: &'a WeakCache<V>,
    path: &'a Path,
    loader: &'a Loader<V>,
    done: bool,
}

impl<V> LoadGuard<'_, V> {
    fn finish(&mut self, object: Option<Arc<V>>) {
        self.loader.finish(object);
        self.cache.loaders.lock().remove(self.path);
        self.done = true;
    }
}

impl<V> Drop for LoadGuard<'_, V> {
    fn drop(&mut self) {
        if !self.done {
            self.finish(None);
        }
    }
}
