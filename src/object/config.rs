use std::io::{Error, ErrorKind};
use url::Url;

use crate::object::FileBackend;
use crate::object::ObjectStorage;

pub fn object_storage_with_config(url: &Url) -> Result<Box<dyn ObjectStorage>, Error> {
    log::info!("object storage: {}", url);

    match url.scheme() {
        "file" => {
            // Expecting a folder path
            let folder = url
                .to_file_path()
                .map_err(|_| Error::new(ErrorKind::InvalidInput, "file url is not a local path"))?;
            Ok(Box::new(FileBackend::new(folder)?))
        }
        scheme => {
            log::error!("No such object storage: {}", scheme);
            Err(Error::new(ErrorKind::Unsupported, format!("unsupported url scheme: <{}>", scheme)))
        }
    }
}
