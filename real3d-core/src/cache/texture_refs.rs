use crate::error::{Real3dError, Resource};
use crate::texture::TextureRef;
use smallvec::SmallVec;

/// Most models reference only a handful of textures.
const INLINE_REFS: usize = 8;

/// Upper bound on references recorded per model.
pub const MAX_TEXTURE_REFS: usize = 128;

/// Distinct textures used by a cached model, decoded on every draw of a
/// static model.
#[derive(Debug, Clone, Default)]
pub struct TextureRefs {
    refs: SmallVec<[TextureRef; INLINE_REFS]>,
}

impl TextureRefs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a reference. Duplicates are ignored; fails once the set is full.
    pub fn add(&mut self, tex: TextureRef) -> Result<(), Real3dError> {
        if self.refs.contains(&tex) {
            return Ok(());
        }
        if self.refs.len() >= MAX_TEXTURE_REFS {
            return Err(Real3dError::capacity(Resource::TextureRefs));
        }
        self.refs.push(tex);
        Ok(())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.refs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TextureRef> {
        self.refs.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tex(x: u16) -> TextureRef {
        TextureRef {
            format: 0,
            x,
            y: 0,
            width: 32,
            height: 32,
        }
    }

    #[test]
    fn duplicates_are_recorded_once() {
        let mut refs = TextureRefs::new();
        refs.add(tex(0)).unwrap();
        refs.add(tex(0)).unwrap();
        refs.add(tex(32)).unwrap();
        assert_eq!(refs.len(), 2);
    }

    #[test]
    fn full_set_rejects_new_references() {
        let mut refs = TextureRefs::new();
        for i in 0..MAX_TEXTURE_REFS as u16 {
            refs.add(tex(i)).unwrap();
        }
        assert!(refs.add(tex(0)).is_ok());
        let err = refs.add(tex(2000)).unwrap_err();
        assert!(err.is_capacity());
        assert_eq!(refs.len(), MAX_TEXTURE_REFS);
    }
}
