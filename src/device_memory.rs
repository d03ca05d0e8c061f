/// PLC device memory for server-side simulation
///
/// This module provides thread-safe word storage keyed by device type and
/// offset. Unwritten words read as zero. A device can be given a size, after
/// which accesses beyond it fail the way a real CPU module rejects them.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use crate::device::DeviceType;
use crate::error::{McError, McResult};

/// End code a CPU module returns for an access outside the device range
pub const END_CODE_OUT_OF_RANGE: u16 = 0x4031;

/// Word memory for every device type
///
/// Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct DeviceMemory {
    words: Arc<RwLock<HashMap<(DeviceType, u32), i16>>>,
    /// Number of addressable words per device; devices not listed are unbounded
    sizes: Arc<RwLock<HashMap<DeviceType, u32>>>,
}

impl DeviceMemory {
    /// Create empty device memory
    pub fn new() -> Self {
        Self::default()
    }

    /// Limit `device` to offsets below `size`
    pub fn set_device_size(&self, device: DeviceType, size: u32) -> McResult<()> {
        let mut sizes = self.sizes.write().map_err(|_| McError::io("Failed to lock device sizes"))?;
        sizes.insert(device, size);
        Ok(())
    }

    fn check_range(&self, device: DeviceType, offset: u32, count: usize) -> McResult<()> {
        let sizes = self.sizes.read().map_err(|_| McError::io("Failed to lock device sizes"))?;
        if let Some(&size) = sizes.get(&device) {
            if offset as u64 + count as u64 > size as u64 {
                return Err(McError::plc(END_CODE_OUT_OF_RANGE));
            }
        }
        Ok(())
    }

    /// Read `count` consecutive words
    pub fn read_words(&self, device: DeviceType, offset: u32, count: u16) -> McResult<Vec<i16>> {
        self.check_range(device, offset, count as usize)?;
        let words = self.words.read().map_err(|_| McError::io("Failed to lock device memory"))?;
        let mut result = Vec::with_capacity(count as usize);

        for i in 0..count as u32 {
            let at = offset.wrapping_add(i);
            result.push(words.get(&(device, at)).copied().unwrap_or(0));
        }

        Ok(result)
    }

    /// Write consecutive words
    pub fn write_words(&self, device: DeviceType, offset: u32, values: &[i16]) -> McResult<()> {
        self.check_range(device, offset, values.len())?;
        let mut words = self.words.write().map_err(|_| McError::io("Failed to lock device memory"))?;
        for (i, &value) in values.iter().enumerate() {
            words.insert((device, offset.wrapping_add(i as u32)), value);
        }
        Ok(())
    }

    /// Set a single word (for simulation/testing)
    pub fn set_word(&self, device: DeviceType, offset: u32, value: i16) -> McResult<()> {
        self.write_words(device, offset, &[value])
    }

    /// Get a single word
    pub fn get_word(&self, device: DeviceType, offset: u32) -> McResult<i16> {
        Ok(self.read_words(device, offset, 1)?[0])
    }

    /// Get device memory statistics
    pub fn get_stats(&self) -> DeviceMemoryStats {
        let words = match self.words.read() {
            Ok(words) => words,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut per_device: HashMap<DeviceType, usize> = HashMap::new();
        for (device, _) in words.keys() {
            *per_device.entry(*device).or_default() += 1;
        }
        DeviceMemoryStats {
            stored_words: words.len(),
            per_device,
        }
    }
}

/// Device memory statistics
#[derive(Debug, Clone)]
pub struct DeviceMemoryStats {
    pub stored_words: usize,
    pub per_device: HashMap<DeviceType, usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_operations() {
        let memory = DeviceMemory::new();

        memory.set_word(DeviceType::D, 100, 12345).unwrap();
        assert_eq!(memory.get_word(DeviceType::D, 100).unwrap(), 12345);

        memory.write_words(DeviceType::W, 0x10, &[1, -2, 3]).unwrap();
        assert_eq!(memory.read_words(DeviceType::W, 0x10, 3).unwrap(), vec![1, -2, 3]);

        // devices do not alias each other
        assert_eq!(memory.get_word(DeviceType::R, 100).unwrap(), 0);
    }

    #[test]
    fn test_device_size_limit() {
        let memory = DeviceMemory::new();
        memory.set_device_size(DeviceType::D, 100).unwrap();

        assert!(memory.read_words(DeviceType::D, 98, 2).is_ok());
        let err = memory.read_words(DeviceType::D, 99, 2).unwrap_err();
        assert_eq!(err.plc_code(), Some(END_CODE_OUT_OF_RANGE));
        assert!(memory.write_words(DeviceType::D, 100, &[1]).is_err());
    }

    #[test]
    fn test_stats() {
        let memory = DeviceMemory::new();
        memory.write_words(DeviceType::D, 0, &[1, 2]).unwrap();
        memory.set_word(DeviceType::M, 0, 1).unwrap();

        let stats = memory.get_stats();
        assert_eq!(stats.stored_words, 3);
        assert_eq!(stats.per_device[&DeviceType::D], 2);
    }
}
