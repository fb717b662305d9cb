//! COPY as a tree walk.
use crate::errors::DavError;
use crate::repo::resource::DavResource;
use crate::repo::walker::CallType;
use crate::store::MAX_NAME_LEN;
use crate::DavResult;

/// Walk callback that recreates every visited resource below `dst_root`.
///
/// Collections are created, data objects copied server side, overwriting
/// whatever is in the way.
pub(crate) struct CopyWalk<'a> {
    pub src_root: &'a str,
    pub dst_root: &'a str,
    pub resource: Option<&'a str>,
}

impl<'a> CopyWalk<'a> {
    fn dest_path(&self, src: &str) -> DavResult<String> {
        let rest = src.strip_prefix(self.src_root).ok_or_else(|| {
            DavError::Internal(format!("<{src}> is not below copy root <{}>", self.src_root))
        })?;
        if self.dst_root.len() + rest.len() >= MAX_NAME_LEN {
            error!(
                "copy destination for <{}> below <{}> exceeds the store's path length limit",
                src, self.dst_root
            );
            return Err(DavError::PathTooLong(format!("{}{}", self.dst_root, rest)));
        }
        Ok(format!("{}{}", self.dst_root, rest))
    }

    pub fn visit(&mut self, res: &DavResource, calltype: CallType) -> DavResult<()> {
        if calltype == CallType::LockNull {
            return Ok(());
        }
        let src = res.store_path();
        let dst = self.dest_path(src)?;
        debug!("copy <{}> to <{}>", src, dst);
        let session = res.session();
        if res.is_collection() {
            session
                .create_collection(&dst)
                .map_err(|e| DavError::remote("create collection", &dst, e))
        } else {
            session
                .copy(src, &dst, true, self.resource)
                .map_err(|e| DavError::remote("copy", &dst, e))
        }
    }
}
