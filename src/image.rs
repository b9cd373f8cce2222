/// Process-image registry
///
/// Typed directories of optional cells covering the scan engine's input,
/// output and memory areas. The scan engine allocates cells at program
/// load; the bridge looks slots up by `(area, width, index[, bit])` and
/// reads or writes them only while holding the image mutex (the scan
/// lock). Out-of-range and unallocated queries report absence, never an
/// error; classification is the resolver's job.

use crate::error::{BridgeError, BridgeResult};
use crate::location::{Area, Location, Width};
use crate::scalar::{ScalarType, ScalarValue};

/// Cells per directory, matching the runtime's buffer dimensions
pub const BUFFER_SIZE: usize = 1024;

/// Handle to a present process-image slot
///
/// Only the registry hands these out, and only for slots that were
/// allocated at lookup time, so a handle stays valid for the lifetime of
/// the loaded program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId {
    location: Location,
}

impl SlotId {
    pub fn location(&self) -> Location {
        self.location
    }

    /// Scalar type fixed by the slot's width glyph
    pub fn scalar_type(&self) -> ScalarType {
        self.location.width.scalar_type()
    }
}

/// A resolved manifest address: slot handle plus its scalar type
#[derive(Debug, Clone, Copy)]
pub struct ResolvedSlot {
    pub slot: SlotId,
    pub scalar_type: ScalarType,
}

fn read_cell<T: Copy>(dir: &[Option<T>], index: usize) -> Option<T> {
    dir.get(index).copied().flatten()
}

fn write_cell<T: Copy>(dir: &mut [Option<T>], index: usize, value: T) -> bool {
    match dir.get_mut(index) {
        Some(cell) if cell.is_some() => {
            *cell = Some(value);
            true
        }
        _ => false,
    }
}

fn alloc_cell<T: Copy>(dir: &mut [Option<T>], index: usize, zero: T) -> bool {
    match dir.get_mut(index) {
        Some(cell) => {
            if cell.is_none() {
                *cell = Some(zero);
            }
            true
        }
        None => false,
    }
}

/// The live I/O and memory cells mutated by each scan cycle
///
/// Boolean directories are 8 bits per index; area `M` has no boolean or
/// byte directory.
#[derive(Debug)]
pub struct ProcessImage {
    bool_input: Vec<[Option<bool>; 8]>,
    bool_output: Vec<[Option<bool>; 8]>,
    byte_input: Vec<Option<u8>>,
    byte_output: Vec<Option<u8>>,
    word_input: Vec<Option<u16>>,
    word_output: Vec<Option<u16>>,
    word_memory: Vec<Option<u16>>,
    dword_input: Vec<Option<u32>>,
    dword_output: Vec<Option<u32>>,
    dword_memory: Vec<Option<u32>>,
    lword_input: Vec<Option<u64>>,
    lword_output: Vec<Option<u64>>,
    lword_memory: Vec<Option<u64>>,
    real_input: Vec<Option<f32>>,
    real_output: Vec<Option<f32>>,
    real_memory: Vec<Option<f32>>,
    lreal_input: Vec<Option<f64>>,
    lreal_output: Vec<Option<f64>>,
    lreal_memory: Vec<Option<f64>>,
}

impl ProcessImage {
    /// A fresh image with no cells allocated
    pub fn new() -> Self {
        Self {
            bool_input: vec![[None; 8]; BUFFER_SIZE],
            bool_output: vec![[None; 8]; BUFFER_SIZE],
            byte_input: vec![None; BUFFER_SIZE],
            byte_output: vec![None; BUFFER_SIZE],
            word_input: vec![None; BUFFER_SIZE],
            word_output: vec![None; BUFFER_SIZE],
            word_memory: vec![None; BUFFER_SIZE],
            dword_input: vec![None; BUFFER_SIZE],
            dword_output: vec![None; BUFFER_SIZE],
            dword_memory: vec![None; BUFFER_SIZE],
            lword_input: vec![None; BUFFER_SIZE],
            lword_output: vec![None; BUFFER_SIZE],
            lword_memory: vec![None; BUFFER_SIZE],
            real_input: vec![None; BUFFER_SIZE],
            real_output: vec![None; BUFFER_SIZE],
            real_memory: vec![None; BUFFER_SIZE],
            lreal_input: vec![None; BUFFER_SIZE],
            lreal_output: vec![None; BUFFER_SIZE],
            lreal_memory: vec![None; BUFFER_SIZE],
        }
    }

    /// Allocate the cell for a location, zero-initialized
    ///
    /// Loader-side surface: the scan engine marks every located variable
    /// of the loaded program present before the bridge starts. Allocating
    /// an already present cell keeps its value.
    pub fn allocate(&mut self, location: Location) -> BridgeResult<SlotId> {
        let Location {
            area,
            width,
            index,
            bit,
        } = location;

        if area == Area::Memory && matches!(width, Width::X | Width::B) {
            return Err(BridgeError::unsupported(&location));
        }

        let ok = match (area, width) {
            (_, Width::X) => {
                let bit = bit.unwrap_or(0) as usize;
                let dir = match area {
                    Area::Input => &mut self.bool_input,
                    Area::Output => &mut self.bool_output,
                    Area::Memory => unreachable!(),
                };
                match dir.get_mut(index) {
                    Some(byte) => {
                        if byte[bit].is_none() {
                            byte[bit] = Some(false);
                        }
                        true
                    }
                    None => false,
                }
            }
            (Area::Input, Width::B) => alloc_cell(&mut self.byte_input, index, 0),
            (Area::Output, Width::B) => alloc_cell(&mut self.byte_output, index, 0),
            (Area::Input, Width::W) => alloc_cell(&mut self.word_input, index, 0),
            (Area::Output, Width::W) => alloc_cell(&mut self.word_output, index, 0),
            (Area::Memory, Width::W) => alloc_cell(&mut self.word_memory, index, 0),
            (Area::Input, Width::D) => alloc_cell(&mut self.dword_input, index, 0),
            (Area::Output, Width::D) => alloc_cell(&mut self.dword_output, index, 0),
            (Area::Memory, Width::D) => alloc_cell(&mut self.dword_memory, index, 0),
            (Area::Input, Width::L) => alloc_cell(&mut self.lword_input, index, 0),
            (Area::Output, Width::L) => alloc_cell(&mut self.lword_output, index, 0),
            (Area::Memory, Width::L) => alloc_cell(&mut self.lword_memory, index, 0),
            (Area::Input, Width::R) => alloc_cell(&mut self.real_input, index, 0.0),
            (Area::Output, Width::R) => alloc_cell(&mut self.real_output, index, 0.0),
            (Area::Memory, Width::R) => alloc_cell(&mut self.real_memory, index, 0.0),
            (Area::Input, Width::F) => alloc_cell(&mut self.lreal_input, index, 0.0),
            (Area::Output, Width::F) => alloc_cell(&mut self.lreal_output, index, 0.0),
            (Area::Memory, Width::F) => alloc_cell(&mut self.lreal_memory, index, 0.0),
            (Area::Memory, Width::B) => unreachable!(),
        };

        if !ok {
            return Err(BridgeError::configuration(format!(
                "location {} index outside [0,{})",
                location, BUFFER_SIZE
            )));
        }
        Ok(SlotId { location })
    }

    /// Parse a location token and allocate its cell
    pub fn allocate_token(&mut self, token: &str) -> BridgeResult<SlotId> {
        self.allocate(token.parse()?)
    }

    /// Look a slot up; absent for out-of-range indexes, unallocated cells
    /// and areas without a matching directory
    pub fn slot(&self, area: Area, width: Width, index: usize, bit: Option<u8>) -> Option<SlotId> {
        let location = Location {
            area,
            width,
            index,
            bit,
        };
        let present = match (area, width) {
            (Area::Input, Width::X) => {
                let bit = bit? as usize;
                bit < 8 && self.bool_input.get(index)?[bit].is_some()
            }
            (Area::Output, Width::X) => {
                let bit = bit? as usize;
                bit < 8 && self.bool_output.get(index)?[bit].is_some()
            }
            (Area::Input, Width::B) => read_cell(&self.byte_input, index).is_some(),
            (Area::Output, Width::B) => read_cell(&self.byte_output, index).is_some(),
            (Area::Input, Width::W) => read_cell(&self.word_input, index).is_some(),
            (Area::Output, Width::W) => read_cell(&self.word_output, index).is_some(),
            (Area::Memory, Width::W) => read_cell(&self.word_memory, index).is_some(),
            (Area::Input, Width::D) => read_cell(&self.dword_input, index).is_some(),
            (Area::Output, Width::D) => read_cell(&self.dword_output, index).is_some(),
            (Area::Memory, Width::D) => read_cell(&self.dword_memory, index).is_some(),
            (Area::Input, Width::L) => read_cell(&self.lword_input, index).is_some(),
            (Area::Output, Width::L) => read_cell(&self.lword_output, index).is_some(),
            (Area::Memory, Width::L) => read_cell(&self.lword_memory, index).is_some(),
            (Area::Input, Width::R) => read_cell(&self.real_input, index).is_some(),
            (Area::Output, Width::R) => read_cell(&self.real_output, index).is_some(),
            (Area::Memory, Width::R) => read_cell(&self.real_memory, index).is_some(),
            (Area::Input, Width::F) => read_cell(&self.lreal_input, index).is_some(),
            (Area::Output, Width::F) => read_cell(&self.lreal_output, index).is_some(),
            (Area::Memory, Width::F) => read_cell(&self.lreal_memory, index).is_some(),
            (Area::Memory, Width::X) | (Area::Memory, Width::B) => false,
        };
        present.then_some(SlotId { location })
    }

    /// Resolve a manifest address to a slot handle and its scalar type
    ///
    /// `Unsupported` for area/width combinations without a directory,
    /// `Unavailable` when the compiler did not allocate the cell.
    pub fn resolve(&self, location: &Location) -> BridgeResult<ResolvedSlot> {
        if location.area == Area::Memory && matches!(location.width, Width::X | Width::B) {
            return Err(BridgeError::unsupported(location));
        }
        match self.slot(location.area, location.width, location.index, location.bit) {
            Some(slot) => Ok(ResolvedSlot {
                slot,
                scalar_type: location.width.scalar_type(),
            }),
            None => Err(BridgeError::unavailable(location)),
        }
    }

    /// Read a slot's current value
    pub fn read(&self, slot: SlotId) -> BridgeResult<ScalarValue> {
        let Location {
            area,
            width,
            index,
            bit,
        } = slot.location;
        let missing = || BridgeError::unavailable(&slot.location);

        let value = match (area, width) {
            (Area::Input, Width::X) => {
                let bit = bit.unwrap_or(0) as usize;
                ScalarValue::Boolean(
                    self.bool_input
                        .get(index)
                        .and_then(|byte| byte[bit])
                        .ok_or_else(missing)?,
                )
            }
            (Area::Output, Width::X) => {
                let bit = bit.unwrap_or(0) as usize;
                ScalarValue::Boolean(
                    self.bool_output
                        .get(index)
                        .and_then(|byte| byte[bit])
                        .ok_or_else(missing)?,
                )
            }
            (Area::Input, Width::B) => {
                ScalarValue::Byte(read_cell(&self.byte_input, index).ok_or_else(missing)?)
            }
            (Area::Output, Width::B) => {
                ScalarValue::Byte(read_cell(&self.byte_output, index).ok_or_else(missing)?)
            }
            (Area::Input, Width::W) => {
                ScalarValue::UInt16(read_cell(&self.word_input, index).ok_or_else(missing)?)
            }
            (Area::Output, Width::W) => {
                ScalarValue::UInt16(read_cell(&self.word_output, index).ok_or_else(missing)?)
            }
            (Area::Memory, Width::W) => {
                ScalarValue::UInt16(read_cell(&self.word_memory, index).ok_or_else(missing)?)
            }
            (Area::Input, Width::D) => {
                ScalarValue::UInt32(read_cell(&self.dword_input, index).ok_or_else(missing)?)
            }
            (Area::Output, Width::D) => {
                ScalarValue::UInt32(read_cell(&self.dword_output, index).ok_or_else(missing)?)
            }
            (Area::Memory, Width::D) => {
                ScalarValue::UInt32(read_cell(&self.dword_memory, index).ok_or_else(missing)?)
            }
            (Area::Input, Width::L) => {
                ScalarValue::UInt64(read_cell(&self.lword_input, index).ok_or_else(missing)?)
            }
            (Area::Output, Width::L) => {
                ScalarValue::UInt64(read_cell(&self.lword_output, index).ok_or_else(missing)?)
            }
            (Area::Memory, Width::L) => {
                ScalarValue::UInt64(read_cell(&self.lword_memory, index).ok_or_else(missing)?)
            }
            (Area::Input, Width::R) => {
                ScalarValue::Float(read_cell(&self.real_input, index).ok_or_else(missing)?)
            }
            (Area::Output, Width::R) => {
                ScalarValue::Float(read_cell(&self.real_output, index).ok_or_else(missing)?)
            }
            (Area::Memory, Width::R) => {
                ScalarValue::Float(read_cell(&self.real_memory, index).ok_or_else(missing)?)
            }
            (Area::Input, Width::F) => {
                ScalarValue::Double(read_cell(&self.lreal_input, index).ok_or_else(missing)?)
            }
            (Area::Output, Width::F) => {
                ScalarValue::Double(read_cell(&self.lreal_output, index).ok_or_else(missing)?)
            }
            (Area::Memory, Width::F) => {
                ScalarValue::Double(read_cell(&self.lreal_memory, index).ok_or_else(missing)?)
            }
            (Area::Memory, Width::X) | (Area::Memory, Width::B) => return Err(missing()),
        };
        Ok(value)
    }

    /// Write a slot, rejecting values whose type does not exactly match
    /// the slot's width
    pub fn write(&mut self, slot: SlotId, value: ScalarValue) -> BridgeResult<()> {
        let Location {
            area,
            width,
            index,
            bit,
        } = slot.location;
        let expected = slot.scalar_type();
        let mismatch = || BridgeError::type_mismatch(expected, value.scalar_type());
        let missing = || BridgeError::unavailable(&slot.location);

        let ok = match (area, width) {
            (_, Width::X) => {
                let v = value.as_bool().ok_or_else(mismatch)?;
                let bit = bit.unwrap_or(0) as usize;
                let dir = match area {
                    Area::Input => &mut self.bool_input,
                    Area::Output => &mut self.bool_output,
                    Area::Memory => return Err(missing()),
                };
                match dir.get_mut(index) {
                    Some(byte) if byte[bit].is_some() => {
                        byte[bit] = Some(v);
                        true
                    }
                    _ => false,
                }
            }
            (Area::Input, Width::B) => {
                write_cell(&mut self.byte_input, index, value.as_u8().ok_or_else(mismatch)?)
            }
            (Area::Output, Width::B) => {
                write_cell(&mut self.byte_output, index, value.as_u8().ok_or_else(mismatch)?)
            }
            (Area::Memory, Width::B) => return Err(missing()),
            (Area::Input, Width::W) => {
                write_cell(&mut self.word_input, index, value.as_u16().ok_or_else(mismatch)?)
            }
            (Area::Output, Width::W) => {
                write_cell(&mut self.word_output, index, value.as_u16().ok_or_else(mismatch)?)
            }
            (Area::Memory, Width::W) => {
                write_cell(&mut self.word_memory, index, value.as_u16().ok_or_else(mismatch)?)
            }
            (Area::Input, Width::D) => {
                write_cell(&mut self.dword_input, index, value.as_u32().ok_or_else(mismatch)?)
            }
            (Area::Output, Width::D) => {
                write_cell(&mut self.dword_output, index, value.as_u32().ok_or_else(mismatch)?)
            }
            (Area::Memory, Width::D) => {
                write_cell(&mut self.dword_memory, index, value.as_u32().ok_or_else(mismatch)?)
            }
            (Area::Input, Width::L) => {
                write_cell(&mut self.lword_input, index, value.as_u64().ok_or_else(mismatch)?)
            }
            (Area::Output, Width::L) => {
                write_cell(&mut self.lword_output, index, value.as_u64().ok_or_else(mismatch)?)
            }
            (Area::Memory, Width::L) => {
                write_cell(&mut self.lword_memory, index, value.as_u64().ok_or_else(mismatch)?)
            }
            (Area::Input, Width::R) => {
                write_cell(&mut self.real_input, index, value.as_f32().ok_or_else(mismatch)?)
            }
            (Area::Output, Width::R) => {
                write_cell(&mut self.real_output, index, value.as_f32().ok_or_else(mismatch)?)
            }
            (Area::Memory, Width::R) => {
                write_cell(&mut self.real_memory, index, value.as_f32().ok_or_else(mismatch)?)
            }
            (Area::Input, Width::F) => {
                write_cell(&mut self.lreal_input, index, value.as_f64().ok_or_else(mismatch)?)
            }
            (Area::Output, Width::F) => {
                write_cell(&mut self.lreal_output, index, value.as_f64().ok_or_else(mismatch)?)
            }
            (Area::Memory, Width::F) => {
                write_cell(&mut self.lreal_memory, index, value.as_f64().ok_or_else(mismatch)?)
            }
        };

        if !ok {
            return Err(missing());
        }
        Ok(())
    }
}

impl Default for ProcessImage {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_and_read_write() {
        let mut image = ProcessImage::new();
        let slot = image.allocate_token("%QX0.1").unwrap();
        assert_eq!(image.read(slot).unwrap(), ScalarValue::Boolean(false));

        image.write(slot, ScalarValue::Boolean(true)).unwrap();
        assert_eq!(image.read(slot).unwrap(), ScalarValue::Boolean(true));

        let word = image.allocate_token("%IW5").unwrap();
        image.write(word, ScalarValue::UInt16(0xBEEF)).unwrap();
        assert_eq!(image.read(word).unwrap(), ScalarValue::UInt16(0xBEEF));
    }

    #[test]
    fn test_unallocated_slot_is_absent() {
        let image = ProcessImage::new();
        assert!(image.slot(Area::Output, Width::L, 7, None).is_none());

        let location: Location = "%QL7".parse().unwrap();
        assert!(matches!(
            image.resolve(&location),
            Err(BridgeError::Unavailable { .. })
        ));
    }

    #[test]
    fn test_out_of_range_is_absent_not_error() {
        let image = ProcessImage::new();
        assert!(image
            .slot(Area::Input, Width::W, BUFFER_SIZE + 10, None)
            .is_none());
    }

    #[test]
    fn test_memory_bit_and_byte_unsupported() {
        let mut image = ProcessImage::new();
        let location: Location = "%MB0".parse().unwrap();
        assert!(matches!(
            image.resolve(&location),
            Err(BridgeError::Unsupported { .. })
        ));
        assert!(matches!(
            image.allocate(location),
            Err(BridgeError::Unsupported { .. })
        ));

        // Unsupported wins over absence classification
        let location = Location {
            area: Area::Memory,
            width: Width::X,
            index: 0,
            bit: Some(0),
        };
        assert!(matches!(
            image.resolve(&location),
            Err(BridgeError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_write_type_is_exact() {
        let mut image = ProcessImage::new();
        let slot = image.allocate_token("%MW3").unwrap();
        let err = image.write(slot, ScalarValue::UInt32(1)).unwrap_err();
        assert!(matches!(err, BridgeError::TypeMismatch { .. }));
        assert_eq!(image.read(slot).unwrap(), ScalarValue::UInt16(0));
    }

    #[test]
    fn test_resolver_fixes_type_from_width() {
        let mut image = ProcessImage::new();
        image.allocate_token("%MR2").unwrap();
        let resolved = image.resolve(&"%MR2".parse().unwrap()).unwrap();
        assert_eq!(resolved.scalar_type, ScalarType::Float);
        assert_eq!(resolved.slot.scalar_type(), ScalarType::Float);
    }

    #[test]
    fn test_bits_are_independent() {
        let mut image = ProcessImage::new();
        let b1 = image.allocate_token("%IX0.1").unwrap();
        let b2 = image.allocate_token("%IX0.2").unwrap();
        image.write(b1, ScalarValue::Boolean(true)).unwrap();
        assert_eq!(image.read(b2).unwrap(), ScalarValue::Boolean(false));
        assert!(image.slot(Area::Input, Width::X, 0, Some(3)).is_none());
    }
}
