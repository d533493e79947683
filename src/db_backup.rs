//! Hot backup of the case database.
//!
//! Uses `rusqlite::backup::Backup` so the live database can stay open while
//! the copy is taken. Default destination is `~/.prevdesk/prevdesk.db.bak`.

use std::path::{Path, PathBuf};

use crate::db::{CaseDb, DbError};

pub fn default_backup_path() -> Result<PathBuf, DbError> {
    Ok(CaseDb::db_path()?.with_extension("db.bak"))
}

/// Copy every page of `db` into `dest`, replacing what was there.
pub fn backup_database(db: &CaseDb, dest: &Path) -> Result<PathBuf, DbError> {
    if let Some(parent) = dest.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).map_err(DbError::CreateDir)?;
        }
    }

    let mut backup_conn = rusqlite::Connection::open(dest)?;
    let backup = rusqlite::backup::Backup::new(db.conn_ref(), &mut backup_conn)?;
    // Case databases are small; copy all pages in one step.
    backup.step(-1)?;
    drop(backup);

    log::info!("Database backed up to {}", dest.display());
    Ok(dest.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_copies_cases() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = CaseDb::open_at(dir.path().join("live.db")).expect("open db");
        let caso = db.create_caso("Maria Lima", Some("111.222.333-44")).expect("caso");

        let dest = dir.path().join("bak").join("live.db.bak");
        let written = backup_database(&db, &dest).expect("backup");
        assert_eq!(written, dest);

        let copy = CaseDb::open_at(dest).expect("open backup");
        let restored = copy.get_caso(&caso.id).expect("get").expect("row");
        assert_eq!(restored, caso);
    }
}
