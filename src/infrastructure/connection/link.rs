use std::io;
use std::os::fd::OwnedFd;

use crate::infrastructure::nonblocking::AsyncFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Serial,
    Network,
}

/// An open connection to the target. Dropping it closes the descriptor.
#[derive(Debug)]
pub struct Link {
    kind: LinkKind,
    io: AsyncFile,
    name: String,
}

impl Link {
    pub fn new(kind: LinkKind, fd: OwnedFd, name: impl Into<String>) -> io::Result<Self> {
        Ok(Self {
            kind,
            io: AsyncFile::new(fd)?,
            name: name.into(),
        })
    }

    pub fn kind(&self) -> LinkKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn io(&self) -> &AsyncFile {
        &self.io
    }
}
