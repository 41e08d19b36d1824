/// Made-up cylinder/head/sector geometry reported for the virtual device.
///
/// There is no real geometry behind a capacity figure, so this mirrors the
/// classic fiction: 4 heads, 1 sector per track, and whatever cylinder count
/// makes the numbers multiply out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DiskGeometry {
    pub cylinders: u64,
    pub heads: u8,
    pub sectors: u8,
    pub start: u64,
}

impl DiskGeometry {
    pub fn from_capacity(capacity_sectors: u64) -> Self {
        Self {
            cylinders: (capacity_sectors & !0x3f) >> 6,
            heads: 4,
            sectors: 1,
            start: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_derives_from_capacity() {
        let geo = DiskGeometry::from_capacity(1000);
        assert_eq!(geo.cylinders, (1000 & !0x3f) >> 6);
        assert_eq!(geo.heads, 4);
        assert_eq!(geo.sectors, 1);
        assert_eq!(geo.start, 0);
    }
}
