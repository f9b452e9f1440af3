use anyhow::Result;
use std::io::{Read, Write};
use std::path::PathBuf;
use tar::{Archive, Builder, EntryType, Header};

struct Member {
    path: PathBuf,
    mode: u32,
    entry_type: EntryType,
    link_name: Option<PathBuf>,
    content: Vec<u8>,
}

/// Re-pack a tar archive into a canonical byte layout.
///
/// Entries are sorted by path; ownership is reset to 0:0 and every mtime is
/// set to `mtime`. Mode, type, link targets and contents are kept.
pub fn rebuild_tar<R: Read, W: Write>(source: R, sink: W, mtime: u64) -> Result<W> {
    let mut archive = Archive::new(source);
    let mut members = Vec::new();

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.to_path_buf();
        let link_name = entry.link_name()?.map(|l| l.to_path_buf());
        let mode = entry.header().mode()?;
        let entry_type = entry.header().entry_type();

        let mut content = Vec::new();
        entry.read_to_end(&mut content)?;

        members.push(Member {
            path,
            mode,
            entry_type,
            link_name,
            content,
        });
    }

    members.sort_by(|a, b| a.path.cmp(&b.path));

    let mut builder = Builder::new(sink);
    for member in &members {
        let mut header = Header::new_gnu();
        header.set_entry_type(member.entry_type);
        header.set_size(member.content.len() as u64);
        header.set_mode(member.mode);

        // Normalize metadata
        header.set_mtime(mtime);
        header.set_uid(0);
        header.set_gid(0);

        match &member.link_name {
            Some(target) => builder.append_link(&mut header, &member.path, target)?,
            None => builder.append_data(&mut header, &member.path, &member.content[..])?,
        }
    }

    Ok(builder.into_inner()?)
}
