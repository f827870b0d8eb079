//! Removing partial state of a cancelled job.

use std::io;
use std::path::Path;

use anyhow::Result;

use super::parts;
use crate::resource::Resource;
use crate::resume_db::ResumeDb;
use crate::storage::temp_path;

fn remove_if_present(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Delete resume records, `.part` files and finished-but-unmerged stream
/// files of `resource`. The final destination file is never touched.
pub async fn discard_partials(db: &ResumeDb, resource: &Resource) -> Result<()> {
    let merged = resource.companion.is_some();
    for part in parts(resource) {
        db.delete_record(&part.key()).await?;
        remove_if_present(&temp_path(&part.target))?;
        if merged {
            remove_if_present(&part.target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn removes_parts_but_not_destination() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("clip.mp4");
        let audio = Resource::new("http://h/a", dir.path().join("clip.audio.tmp"));
        let r = Resource::new("http://h/v", &dest).with_companion(audio);
        let video = r.stream_path();
        std::fs::write(temp_path(&video), b"v").unwrap();
        std::fs::write(dir.path().join("clip.audio.tmp"), b"a").unwrap();
        std::fs::write(&dest, b"older file").unwrap();

        let db = ResumeDb::open_memory().await.unwrap();
        discard_partials(&db, &r).await.unwrap();
        assert!(!temp_path(&video).exists());
        assert!(!dir.path().join("clip.audio.tmp").exists());
        assert!(dest.exists());
    }
}
