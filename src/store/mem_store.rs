use std::{cell::RefCell, collections::BTreeMap, fs, path::Path, rc::Rc};

use super::*;

/// Objects shared between a [`MemStore`] and the test that inspects it.
pub(crate) type SharedObjects = Rc<RefCell<BTreeMap<String, Vec<u8>>>>;

pub(crate) struct MemStore {
    objects: SharedObjects,
    fail_on: Option<String>,
}

impl MemStore {
    pub(crate) fn new() -> Self {
        MemStore {
            objects: Rc::default(),
            fail_on: None,
        }
    }

    /// Uploads of keys ending in `suffix` fail.
    pub(crate) fn failing_on(suffix: &str) -> Self {
        MemStore {
            objects: Rc::default(),
            fail_on: Some(suffix.to_string()),
        }
    }

    pub(crate) fn objects(&self) -> SharedObjects {
        Rc::clone(&self.objects)
    }
}

impl ObjectStore for MemStore {
    fn upload_file(&mut self, local: &Path, key: &str) -> Result<()> {
        validate_key(key)?;
        if self.fail_on.as_ref().is_some_and(|s| key.ends_with(s.as_str())) {
            return Err(keepsake_error!(StoreError {
                description: format!("injected failure for {key}"),
            }));
        }
        let data = fs::read(local)?;
        self.objects.borrow_mut().insert(key.to_string(), data);
        Ok(())
    }

    fn download_file(&mut self, key: &str, local: &Path) -> Result<()> {
        match self.objects.borrow().get(key) {
            Some(data) => Ok(fs::write(local, data)?),
            None => Err(keepsake_error!(StoreError {
                description: format!("Object {key} not found"),
            })),
        }
    }

    fn list_objects(&mut self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .objects
            .borrow()
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}
