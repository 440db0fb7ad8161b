//! Typed views of return packets.
//!
//! Every decoder takes the current return packet (empty when none is
//! available) and yields an empty/zeroed value when the packet is missing or
//! belongs to another function code. Array views borrow the packet and must be
//! copied out before the next command.

use std::fmt::Display;
use std::marker::PhantomData;

use itertools::Itertools;
use num_traits::FromBytes;

use crate::protocol::{FunctionCode, NUM_POINTS};

/// Little-endian array of `T` laid out in a return packet.
pub struct LeView<'a, T, const N: usize> {
    bytes: &'a [u8],
    _marker: PhantomData<T>,
}

pub type Wavelengths<'a> = LeView<'a, u16, 2>;
pub type Samples<'a> = LeView<'a, f32, 4>;

impl<'a, T, const N: usize> LeView<'a, T, N>
where
    T: FromBytes<Bytes = [u8; N]> + 'a,
{
    fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            _marker: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len() / N
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<T> {
        self.bytes.chunks_exact(N).nth(index).map(le::<T, N>)
    }

    pub fn iter(&self) -> impl Iterator<Item = T> + 'a {
        self.bytes.chunks_exact(N).map(le::<T, N>)
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.iter().collect()
    }
}

impl<'a, T, const N: usize> Default for LeView<'a, T, N> {
    fn default() -> Self {
        Self {
            bytes: &[],
            _marker: PhantomData,
        }
    }
}

impl<'a, T, const N: usize> Clone for LeView<'a, T, N> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, T, const N: usize> Copy for LeView<'a, T, N> {}

impl<'a, T, const N: usize> std::fmt::Debug for LeView<'a, T, N>
where
    T: FromBytes<Bytes = [u8; N]> + std::fmt::Debug + 'a,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

fn le<T: FromBytes<Bytes = [u8; N]>, const N: usize>(chunk: &[u8]) -> T {
    let mut bytes = [0u8; N];
    bytes.copy_from_slice(chunk);
    T::from_le_bytes(&bytes)
}

fn u16_at(packet: &[u8], offset: usize) -> u16 {
    le::<u16, 2>(&packet[offset..offset + 2])
}

fn u32_at(packet: &[u8], offset: usize) -> u32 {
    le::<u32, 4>(&packet[offset..offset + 4])
}

fn f32_at(packet: &[u8], offset: usize) -> f32 {
    le::<f32, 4>(&packet[offset..offset + 4])
}

fn matches(packet: &[u8], code: FunctionCode) -> bool {
    packet.len() >= code.return_len() && packet[2] == code as u8
}

/// Point count as reported, clamped to the table capacity.
fn points(count: u32) -> usize {
    (count as usize).min(NUM_POINTS)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SensorId(String);

impl SensorId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Display for SensorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WavelengthInfo<'a> {
    pub num_points: u32,
    pub wavelengths: Wavelengths<'a>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SpectrumInfo<'a> {
    pub integration_time: u16,
    pub is_saturated: bool,
    pub num_points: u32,
    pub spectrum: Samples<'a>,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct XyzInfo {
    pub integration_time: u16,
    pub is_saturated: bool,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Formats the five id bytes as `XX-XX-XX-XX-XX`.
pub fn sensor_id(packet: &[u8]) -> SensorId {
    if !matches(packet, FunctionCode::GetSensorId) {
        return SensorId::default();
    }

    SensorId(packet[4..9].iter().map(|b| format!("{:02X}", b)).join("-"))
}

pub fn wavelength_info(packet: &[u8]) -> WavelengthInfo<'_> {
    if !matches(packet, FunctionCode::GetWavelength) {
        return WavelengthInfo::default();
    }

    let num_points = u32_at(packet, 4);
    WavelengthInfo {
        num_points,
        wavelengths: Wavelengths::new(&packet[8..8 + points(num_points) * 2]),
    }
}

pub fn spectrum_info(packet: &[u8]) -> SpectrumInfo<'_> {
    if !matches(packet, FunctionCode::GetSpectrum) {
        return SpectrumInfo::default();
    }

    let num_points = u32_at(packet, 8);
    let xyz = 12 + NUM_POINTS * 4;
    SpectrumInfo {
        integration_time: u16_at(packet, 4),
        is_saturated: packet[6] == 1,
        num_points,
        spectrum: Samples::new(&packet[12..12 + points(num_points) * 4]),
        x: f32_at(packet, xyz),
        y: f32_at(packet, xyz + 4),
        z: f32_at(packet, xyz + 8),
    }
}

pub fn xyz_info(packet: &[u8]) -> XyzInfo {
    if !matches(packet, FunctionCode::GetXyz) {
        return XyzInfo::default();
    }

    XyzInfo {
        integration_time: u16_at(packet, 4),
        is_saturated: packet[6] == 1,
        x: f32_at(packet, 8),
        y: f32_at(packet, 12),
        z: f32_at(packet, 16),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{place_checksum, PREFIX0, PREFIX1, RET_BUF_SIZE};

    fn packet(code: FunctionCode) -> Vec<u8> {
        let mut packet = vec![0u8; code.return_len()];
        packet[..4].copy_from_slice(&[PREFIX0, PREFIX1, code as u8, 0x01]);
        packet
    }

    fn seal(mut packet: Vec<u8>) -> Vec<u8> {
        let len = packet.len();
        place_checksum(&mut packet, len - 1);
        packet
    }

    #[test]
    fn decode_sensor_id() {
        let mut p = packet(FunctionCode::GetSensorId);
        p[4..9].copy_from_slice(&[0x0A, 0x1B, 0x2C, 0x3D, 0xF0]);
        let p = seal(p);

        assert_eq!(sensor_id(&p).as_str(), "0A-1B-2C-3D-F0");
    }

    #[test]
    fn decode_xyz() {
        let mut p = packet(FunctionCode::GetXyz);
        p[4..6].copy_from_slice(&100u16.to_le_bytes());
        p[6] = 0;
        p[8..12].copy_from_slice(&0.1f32.to_le_bytes());
        p[12..16].copy_from_slice(&0.2f32.to_le_bytes());
        p[16..20].copy_from_slice(&0.3f32.to_le_bytes());
        let p = seal(p);

        assert_eq!(
            xyz_info(&p),
            XyzInfo {
                integration_time: 100,
                is_saturated: false,
                x: 0.1,
                y: 0.2,
                z: 0.3,
            }
        );
    }

    #[test]
    fn decode_spectrum() {
        let mut p = packet(FunctionCode::GetSpectrum);
        p[4..6].copy_from_slice(&32u16.to_le_bytes());
        p[6] = 1;
        p[8..12].copy_from_slice(&(NUM_POINTS as u32).to_le_bytes());
        for i in 0..NUM_POINTS {
            p[12 + i * 4..16 + i * 4].copy_from_slice(&(i as f32 * 0.5).to_le_bytes());
        }
        p[552..556].copy_from_slice(&1.5f32.to_le_bytes());
        p[556..560].copy_from_slice(&2.5f32.to_le_bytes());
        p[560..564].copy_from_slice(&3.5f32.to_le_bytes());
        let p = seal(p);
        assert_eq!(p.len(), RET_BUF_SIZE);

        let info = spectrum_info(&p);

        assert_eq!(info.integration_time, 32);
        assert!(info.is_saturated);
        assert_eq!(info.spectrum.len(), NUM_POINTS);
        assert_eq!(info.spectrum.get(0), Some(0.0));
        assert_eq!(info.spectrum.get(134), Some(67.0));
        assert_eq!(info.spectrum.get(135), None);
        assert_eq!((info.x, info.y, info.z), (1.5, 2.5, 3.5));
    }

    #[test]
    fn decode_wavelength() {
        let mut p = packet(FunctionCode::GetWavelength);
        p[4..8].copy_from_slice(&3u32.to_le_bytes());
        for (i, w) in [340u16, 345, 350].iter().enumerate() {
            p[8 + i * 2..10 + i * 2].copy_from_slice(&w.to_le_bytes());
        }
        let p = seal(p);

        let info = wavelength_info(&p);

        assert_eq!(info.num_points, 3);
        assert_eq!(info.wavelengths.to_vec(), vec![340, 345, 350]);
    }

    #[test]
    fn mismatched_packet_is_empty() {
        let p = seal(packet(FunctionCode::GetXyz));

        assert!(sensor_id(&p).is_empty());
        assert!(spectrum_info(&p).spectrum.is_empty());
        assert_eq!(wavelength_info(&p).num_points, 0);
        assert_eq!(xyz_info(&[]), XyzInfo::default());
    }
}
