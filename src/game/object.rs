//! Replicated game objects: typed field table + changed-bit mask.
//!
//! Every mutable game object exposes a flat array of u32 value slots
//! addressed by [`Field`], with a parallel changed-bit set. A bit is set iff
//! the slot differs from the value last broadcast, so repeated writes of the
//! same value — and writes that return a field to its broadcast value — cost
//! nothing on the wire.
//!
//! Two encodings exist. **Creation** synthesizes its mask from every
//! currently non-zero slot, so a newly-visible observer always receives a
//! complete snapshot regardless of change history. **Update** sends the live
//! changed bits and only the flagged values; the mask is cleared after a
//! successful broadcast round.
//!
//! Wire layout for both: `[block_count: u8][mask: u32 × blocks][values: u32
//! in ascending field order]`.

use crate::network::PacketReader;

/// Number of replicated field slots per object.
pub const FIELD_COUNT: usize = 24;

/// u32 blocks needed to mask every field.
pub const MASK_BLOCKS: usize = (FIELD_COUNT + 31) / 32;

#[derive(Debug, thiserror::Error)]
pub enum ReplicationError {
    #[error("update block count {got} exceeds {max}", max = MASK_BLOCKS)]
    BadBlockCount { got: u8 },

    #[error("update block truncated: {0}")]
    Truncated(#[from] crate::network::FrameError),
}

/// Whether a slot holds an integer or a float (f32 stored as its bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    U32,
    F32,
}

/// Replicated field indices. The discriminants are the positional slot
/// numbers and are wire-stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Field {
    GuidLo = 0,
    GuidHi = 1,
    ObjectType = 2,
    Entry = 3,
    ScaleX = 4,
    Level = 5,
    Health = 6,
    MaxHealth = 7,
    Power = 8,
    MaxPower = 9,
    Faction = 10,
    DisplayId = 11,
    Flags = 12,
    PosX = 13,
    PosY = 14,
    PosZ = 15,
    Orientation = 16,
    MapId = 17,
    ZoneId = 18,
    MoveSpeed = 19,
    NpcFlags = 20,
    DynamicFlags = 21,
    Bytes0 = 22,
    PetNumber = 23,
}

const FIELDS: [Field; FIELD_COUNT] = [
    Field::GuidLo,
    Field::GuidHi,
    Field::ObjectType,
    Field::Entry,
    Field::ScaleX,
    Field::Level,
    Field::Health,
    Field::MaxHealth,
    Field::Power,
    Field::MaxPower,
    Field::Faction,
    Field::DisplayId,
    Field::Flags,
    Field::PosX,
    Field::PosY,
    Field::PosZ,
    Field::Orientation,
    Field::MapId,
    Field::ZoneId,
    Field::MoveSpeed,
    Field::NpcFlags,
    Field::DynamicFlags,
    Field::Bytes0,
    Field::PetNumber,
];

impl Field {
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(i: usize) -> Option<Field> {
        FIELDS.get(i).copied()
    }

    pub fn kind(self) -> FieldKind {
        match self {
            Field::ScaleX
            | Field::PosX
            | Field::PosY
            | Field::PosZ
            | Field::Orientation
            | Field::MoveSpeed => FieldKind::F32,
            _ => FieldKind::U32,
        }
    }
}

/// Per-field dirty bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateMask {
    blocks: [u32; MASK_BLOCKS],
}

impl UpdateMask {
    pub fn set(&mut self, index: usize) {
        self.blocks[index / 32] |= 1 << (index % 32);
    }

    pub fn clear(&mut self, index: usize) {
        self.blocks[index / 32] &= !(1 << (index % 32));
    }

    pub fn test(&self, index: usize) -> bool {
        self.blocks[index / 32] & (1 << (index % 32)) != 0
    }

    pub fn clear_all(&mut self) {
        self.blocks = [0; MASK_BLOCKS];
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.iter().all(|b| *b == 0)
    }

    pub fn count(&self) -> usize {
        self.blocks.iter().map(|b| b.count_ones() as usize).sum()
    }
}

/// One replicated object: value slots, changed bits, and the shadow copy of
/// what observers last saw.
#[derive(Debug, Clone)]
pub struct GameObject {
    guid: u64,
    values: [u32; FIELD_COUNT],
    broadcast: [u32; FIELD_COUNT],
    changed: UpdateMask,
}

impl GameObject {
    pub fn new(guid: u64) -> Self {
        let mut obj = Self {
            guid,
            values: [0; FIELD_COUNT],
            broadcast: [0; FIELD_COUNT],
            changed: UpdateMask::default(),
        };
        // The guid slots are part of the field array so creation frames are
        // self-describing; they never change afterwards.
        obj.values[Field::GuidLo.index()] = guid as u32;
        obj.values[Field::GuidHi.index()] = (guid >> 32) as u32;
        obj.broadcast = obj.values;
        obj
    }

    pub fn guid(&self) -> u64 {
        self.guid
    }

    fn set_raw(&mut self, field: Field, raw: u32) {
        let i = field.index();
        if self.values[i] == raw {
            return; // same-value write: no-op for replication
        }
        self.values[i] = raw;
        if raw != self.broadcast[i] {
            self.changed.set(i);
        } else {
            // Returned to the last-broadcast value before anyone saw the
            // intermediate state; nothing to send.
            self.changed.clear(i);
        }
    }

    pub fn set_u32(&mut self, field: Field, value: u32) {
        debug_assert_eq!(field.kind(), FieldKind::U32);
        self.set_raw(field, value);
    }

    pub fn set_f32(&mut self, field: Field, value: f32) {
        debug_assert_eq!(field.kind(), FieldKind::F32);
        self.set_raw(field, value.to_bits());
    }

    pub fn get_u32(&self, field: Field) -> u32 {
        debug_assert_eq!(field.kind(), FieldKind::U32);
        self.values[field.index()]
    }

    pub fn get_f32(&self, field: Field) -> f32 {
        debug_assert_eq!(field.kind(), FieldKind::F32);
        f32::from_bits(self.values[field.index()])
    }

    pub fn is_dirty(&self) -> bool {
        !self.changed.is_empty()
    }

    pub fn changed_mask(&self) -> &UpdateMask {
        &self.changed
    }

    pub fn position(&self) -> (f32, f32) {
        (self.get_f32(Field::PosX), self.get_f32(Field::PosY))
    }

    fn encode_with_mask(&self, out: &mut Vec<u8>, mask: &UpdateMask) {
        out.push(MASK_BLOCKS as u8);
        for block in mask.blocks {
            out.extend_from_slice(&block.to_be_bytes());
        }
        for i in 0..FIELD_COUNT {
            if mask.test(i) {
                out.extend_from_slice(&self.values[i].to_be_bytes());
            }
        }
    }

    /// Creation snapshot: the mask is synthesized fresh from every
    /// non-zero slot, independent of the live changed bits. Appends to the
    /// caller's sink.
    pub fn encode_create(&self, out: &mut Vec<u8>) {
        let mut mask = UpdateMask::default();
        for (i, v) in self.values.iter().enumerate() {
            if *v != 0 {
                mask.set(i);
            }
        }
        self.encode_with_mask(out, &mask);
    }

    /// Incremental update: live changed bits, flagged values only.
    /// Encodes an empty block when nothing changed; callers normally check
    /// [`is_dirty`](Self::is_dirty) first.
    pub fn encode_update(&self, out: &mut Vec<u8>) {
        self.encode_with_mask(out, &self.changed);
    }

    /// Mark the current state as broadcast: shadow copy refreshed, changed
    /// bits cleared. Call after every successful broadcast round.
    pub fn clear_changed(&mut self) {
        self.broadcast = self.values;
        self.changed.clear_all();
    }

    /// Apply one received creation/update block to this object (the
    /// observer-side replica). Unknown high bits beyond [`FIELD_COUNT`] are
    /// rejected rather than skipped.
    pub fn apply(&mut self, r: &mut PacketReader<'_>) -> Result<(), ReplicationError> {
        let block_count = r.read_u8()?;
        if block_count as usize > MASK_BLOCKS {
            return Err(ReplicationError::BadBlockCount { got: block_count });
        }
        let mut mask = UpdateMask::default();
        for b in 0..block_count as usize {
            mask.blocks[b] = r.read_u32()?;
        }
        for i in 0..FIELD_COUNT {
            if mask.test(i) {
                self.values[i] = r.read_u32()?;
            }
        }
        self.broadcast = self.values;
        self.changed.clear_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(f: impl FnOnce(&mut Vec<u8>)) -> Vec<u8> {
        let mut out = Vec::new();
        f(&mut out);
        out
    }

    #[test]
    fn test_same_value_write_is_a_noop() {
        let mut obj = GameObject::new(1);
        obj.set_u32(Field::Health, 100);
        obj.clear_changed();

        obj.set_u32(Field::Health, 100);
        assert!(!obj.is_dirty());
        obj.set_u32(Field::Health, 100);
        assert!(!obj.changed_mask().test(Field::Health.index()));
    }

    #[test]
    fn test_changed_bit_tracks_last_broadcast_value() {
        let mut obj = GameObject::new(1);
        obj.set_u32(Field::Health, 100);
        obj.clear_changed();

        // A→B→A across one broadcast round: net change is zero, bit clear.
        obj.set_u32(Field::Health, 50);
        assert!(obj.changed_mask().test(Field::Health.index()));
        obj.set_u32(Field::Health, 100);
        assert!(!obj.changed_mask().test(Field::Health.index()));
        assert!(!obj.is_dirty());
    }

    #[test]
    fn test_changed_bit_set_iff_final_differs_from_start() {
        let mut obj = GameObject::new(1);
        obj.set_u32(Field::Level, 10);
        obj.clear_changed();

        for seq in [vec![10u32], vec![11, 12, 10], vec![10, 10], vec![11, 11]] {
            let mut o = obj.clone();
            for v in &seq {
                o.set_u32(Field::Level, *v);
            }
            let expect = *seq.last().unwrap() != 10;
            assert_eq!(
                o.changed_mask().test(Field::Level.index()),
                expect,
                "sequence {:?}",
                seq
            );
        }
    }

    #[test]
    fn test_create_mask_marks_nonzero_fields_only() {
        let mut obj = GameObject::new(0x0000_0001_0000_0002);
        obj.set_u32(Field::Health, 75);
        obj.set_f32(Field::PosX, 10.0);
        obj.clear_changed(); // change history must not matter for creation

        let bytes = encoded(|w| obj.encode_create(w));
        let mut r = PacketReader::new(&bytes);
        let blocks = r.read_u8().unwrap();
        assert_eq!(blocks as usize, MASK_BLOCKS);
        let mask = r.read_u32().unwrap();
        assert_ne!(mask & (1 << Field::GuidLo.index()), 0);
        assert_ne!(mask & (1 << Field::GuidHi.index()), 0);
        assert_ne!(mask & (1 << Field::Health.index()), 0);
        assert_ne!(mask & (1 << Field::PosX.index()), 0);
        assert_eq!(mask & (1 << Field::Level.index()), 0);
        // Values follow in ascending field order: GuidLo first.
        assert_eq!(r.read_u32().unwrap(), 2);
    }

    #[test]
    fn test_update_sends_flagged_values_only() {
        let mut obj = GameObject::new(1);
        obj.set_u32(Field::Health, 100);
        obj.set_u32(Field::Level, 5);
        obj.clear_changed();
        obj.set_u32(Field::Health, 42);

        let bytes = encoded(|w| obj.encode_update(w));
        // 1 block-count byte + 1 mask block + exactly one value.
        assert_eq!(bytes.len(), 1 + 4 * MASK_BLOCKS + 4);
        let mut r = PacketReader::new(&bytes);
        r.read_u8().unwrap();
        let mask = r.read_u32().unwrap();
        assert_eq!(mask, 1 << Field::Health.index());
        assert_eq!(r.read_u32().unwrap(), 42);
    }

    #[test]
    fn test_create_then_updates_reconstruct_live_state() {
        let mut source = GameObject::new(77);
        source.set_u32(Field::Level, 12);
        source.set_u32(Field::Health, 880);
        source.set_f32(Field::PosX, 101.5);
        source.set_f32(Field::PosY, -7.25);

        // Observer learns the object from a creation snapshot.
        let mut replica = GameObject::new(77);
        let create = encoded(|w| source.encode_create(w));
        replica.apply(&mut PacketReader::new(&create)).unwrap();
        source.clear_changed();
        assert_eq!(replica.values, source.values);

        // Arbitrary mutation rounds, each shipped as an update frame.
        let rounds: [&[(Field, u32)]; 3] = [
            &[(Field::Health, 500), (Field::Level, 13)],
            &[(Field::Health, 500)], // same value: empty update
            &[(Field::Health, 1), (Field::PetNumber, 9)],
        ];
        for round in rounds {
            for (field, v) in round {
                source.set_u32(*field, *v);
            }
            let update = encoded(|w| source.encode_update(w));
            source.clear_changed();
            replica.apply(&mut PacketReader::new(&update)).unwrap();
            assert_eq!(replica.values, source.values);
        }

        // Float fields too.
        source.set_f32(Field::PosX, 200.0);
        let update = encoded(|w| source.encode_update(w));
        source.clear_changed();
        replica.apply(&mut PacketReader::new(&update)).unwrap();
        assert_eq!(replica.get_f32(Field::PosX), 200.0);
        assert_eq!(replica.values, source.values);
    }

    #[test]
    fn test_apply_rejects_bad_block_count() {
        let mut obj = GameObject::new(1);
        let bytes = [9u8, 0, 0, 0, 0];
        assert!(matches!(
            obj.apply(&mut PacketReader::new(&bytes)),
            Err(ReplicationError::BadBlockCount { got: 9 })
        ));
    }

    #[test]
    fn test_apply_rejects_truncated_values() {
        let mut source = GameObject::new(1);
        source.set_u32(Field::Health, 7);
        let bytes = encoded(|w| source.encode_update(w));

        let mut replica = GameObject::new(1);
        let chopped = &bytes[..bytes.len() - 2];
        assert!(matches!(
            replica.apply(&mut PacketReader::new(chopped)),
            Err(ReplicationError::Truncated(_))
        ));
    }

    #[test]
    fn test_field_index_roundtrip() {
        for i in 0..FIELD_COUNT {
            assert_eq!(Field::from_index(i).unwrap().index(), i);
        }
        assert!(Field::from_index(FIELD_COUNT).is_none());
    }
}
