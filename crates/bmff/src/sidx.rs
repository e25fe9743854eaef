use bytes::{Bytes, BytesMut};
use tracing::trace;

use crate::box_scan::top_level_boxes;

/// Remove the first top-level `sidx` box from the head of a media fragment.
///
/// Returns the input unchanged when no complete `sidx` box is present.
/// Only the buffer handed in is inspected; a `sidx` that extends past it is
/// left alone, which matches scanning the bounded first read of a fragment.
pub fn strip_sidx(data: Bytes) -> Bytes {
    let Some(sidx) = top_level_boxes(&data)
        .into_iter()
        .find(|b| &b.fourcc == b"sidx")
    else {
        return data;
    };

    trace!(
        offset = sidx.offset,
        len = sidx.len,
        "excising sidx box from fragment head"
    );

    let mut out = BytesMut::with_capacity(data.len() - sidx.len);
    out.extend_from_slice(&data[..sidx.offset]);
    out.extend_from_slice(&data[sidx.offset + sidx.len..]);
    out.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_box(fourcc: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + payload.len());
        out.extend_from_slice(&((8 + payload.len()) as u32).to_be_bytes());
        out.extend_from_slice(fourcc);
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn passthrough_without_sidx() {
        let mut data = make_box(b"styp", &[1; 4]);
        data.extend_from_slice(&make_box(b"moof", &[2; 16]));
        let data = Bytes::from(data);

        assert_eq!(strip_sidx(data.clone()), data);
    }

    #[test]
    fn excises_sidx_between_boxes() {
        let styp = make_box(b"styp", &[1; 4]);
        let sidx = make_box(b"sidx", &[9; 32]);
        let moof = make_box(b"moof", &[2; 16]);

        let mut data = styp.clone();
        data.extend_from_slice(&sidx);
        data.extend_from_slice(&moof);

        let mut expected = styp;
        expected.extend_from_slice(&moof);

        assert_eq!(strip_sidx(Bytes::from(data)), Bytes::from(expected));
    }

    #[test]
    fn excises_sidx_at_start() {
        let sidx = make_box(b"sidx", &[9; 12]);
        let moof = make_box(b"moof", &[2; 16]);

        let mut data = sidx;
        data.extend_from_slice(&moof);

        assert_eq!(strip_sidx(Bytes::from(data)), Bytes::from(moof));
    }

    #[test]
    fn idempotent() {
        let mut data = make_box(b"styp", &[1; 4]);
        data.extend_from_slice(&make_box(b"sidx", &[9; 32]));
        data.extend_from_slice(&make_box(b"moof", &[2; 16]));
        let data = Bytes::from(data);

        let once = strip_sidx(data);
        let twice = strip_sidx(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn leaves_truncated_sidx_alone() {
        let mut data = make_box(b"styp", &[1; 4]);
        // sidx declares more bytes than the buffer holds.
        data.extend_from_slice(&64u32.to_be_bytes());
        data.extend_from_slice(b"sidx");
        data.extend_from_slice(&[0; 8]);
        let data = Bytes::from(data);

        assert_eq!(strip_sidx(data.clone()), data);
    }

    #[test]
    fn passthrough_on_non_box_data() {
        let data = Bytes::from_static(b"not an isobmff fragment");
        assert_eq!(strip_sidx(data.clone()), data);
    }
}
