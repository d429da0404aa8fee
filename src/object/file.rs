use std::{
    collections::HashMap,
    fs::{self, File, OpenOptions},
    io::{Error, ErrorKind, Write},
    os::unix::fs::FileExt,
    path::PathBuf,
    sync::Arc,
};

use parking_lot::Mutex;

use crate::object::ObjectStorage;

/// Objects stored as plain files inside one folder.
pub struct FileBackend {
    folder_path: PathBuf,
    open_files: Mutex<HashMap<String, Arc<File>>>,
}

impl FileBackend {
    /// Uses `folder_path` as the object folder, creating it when missing.
    pub fn new(folder_path: PathBuf) -> Result<FileBackend, Error> {
        fs::create_dir_all(&folder_path)?;
        Ok(FileBackend {
            folder_path,
            open_files: Mutex::new(HashMap::new()),
        })
    }

    fn obj_path(&self, object_name: &str) -> PathBuf {
        self.folder_path.join(object_name)
    }

    // get or open file
    fn get_file(&self, object_name: &str) -> Result<Arc<File>, Error> {
        let mut open_files = self.open_files.lock();
        if let Some(file) = open_files.get(object_name) {
            return Ok(Arc::clone(file));
        }
        let file = Arc::new(
            OpenOptions::new()
                .read(true)
                .write(true)
                .open(self.obj_path(object_name))?,
        );
        open_files.insert(object_name.to_string(), Arc::clone(&file));
        Ok(file)
    }

    fn forget_file(&self, object_name: &str) {
        self.open_files.lock().remove(object_name);
    }

    #[cfg(test)]
    fn open_file_count(&self) -> usize {
        self.open_files.lock().len()
    }
}

impl ObjectStorage for FileBackend {
    fn exists(&self, object_name: &str) -> Result<bool, Error> {
        Ok(self.obj_path(object_name).is_file())
    }

    fn read(&self, object_name: &str) -> Result<Vec<u8>, Error> {
        fs::read(self.obj_path(object_name))
    }

    fn write(&self, object_name: &str, data: &[u8]) -> Result<(), Error> {
        // replaced wholesale, so a cached handle would point at stale length
        self.forget_file(object_name);
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(self.obj_path(object_name))?;
        file.write_all(data)?;
        Ok(())
    }

    fn delete(&self, object_name: &str) -> Result<(), Error> {
        self.forget_file(object_name);
        match fs::remove_file(self.obj_path(object_name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn partial_read(&self, object_name: &str, offset: u64, buf: &mut [u8]) -> Result<(), Error> {
        let file = self.get_file(object_name)?;
        file.read_exact_at(buf, offset)
    }

    fn partial_write(&self, object_name: &str, offset: u64, data: &[u8]) -> Result<(), Error> {
        let file = self.get_file(object_name)?;
        file.write_all_at(data, offset)
    }

    fn persist_object(&self, object_name: &str) -> Result<(), Error> {
        if !self.exists(object_name)? {
            // deleted since it was written; persist() covers the directory entry
            return Ok(());
        }
        self.get_file(object_name)?.sync_data()
    }

    fn persist(&self) -> Result<(), Error> {
        File::open(&self.folder_path)?.sync_all()
    }

    fn close(&self) {
        let mut open_files = self.open_files.lock();
        log::debug!("object::close({} open files)", open_files.len());
        open_files.clear();
    }
}
