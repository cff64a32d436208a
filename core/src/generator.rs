//! Address generation
//!
//! Realistic addresses reuse a real vendor OUI so the result looks like
//! shipped hardware; random addresses are locally administered. Both always
//! clear the multicast bit.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::mac::MacAddress;

/// Known vendor prefixes
pub const VENDOR_OUIS: &[([u8; 3], &str)] = &[
    ([0x00, 0x1b, 0x21], "Intel"),
    ([0x00, 0x1e, 0x67], "Intel"),
    ([0x3c, 0x97, 0x0e], "Intel"),
    ([0x00, 0xe0, 0x4c], "Realtek"),
    ([0x00, 0x10, 0x18], "Broadcom"),
    ([0x00, 0x03, 0x7f], "Atheros"),
    ([0x00, 0xa0, 0xc6], "Qualcomm"),
    ([0x00, 0x00, 0x0c], "Cisco"),
    ([0x00, 0x1b, 0xd4], "Cisco"),
    ([0x00, 0x1c, 0xb3], "Apple"),
    ([0x3c, 0x07, 0x54], "Apple"),
    ([0x00, 0x14, 0x22], "Dell"),
    ([0x18, 0x03, 0x73], "Dell"),
    ([0x00, 0x1b, 0x78], "HP"),
    ([0x3c, 0xd9, 0x2b], "HP"),
    ([0x54, 0xee, 0x75], "Lenovo"),
    ([0x00, 0x04, 0xac], "IBM"),
    ([0x00, 0x15, 0x5d], "Microsoft"),
    ([0x00, 0x50, 0xf2], "Microsoft"),
    ([0x00, 0x50, 0x56], "VMware"),
    ([0x00, 0x0c, 0x29], "VMware"),
    ([0x52, 0x54, 0x00], "QEMU"),
    ([0x00, 0x1a, 0x92], "ASUS"),
    ([0x50, 0xc7, 0xbf], "TP-Link"),
    ([0x00, 0x05, 0x5d], "D-Link"),
    ([0x00, 0x06, 0x25], "Linksys"),
    ([0x00, 0x01, 0x02], "3Com"),
    ([0x00, 0x00, 0x4c], "NEC"),
    ([0x00, 0x80, 0x45], "Panasonic"),
    ([0x00, 0x13, 0xa9], "Sony"),
    ([0x00, 0x12, 0xfb], "Samsung"),
    ([0x00, 0x1c, 0x62], "LG"),
    ([0x00, 0x00, 0x39], "Toshiba"),
    ([0x00, 0x00, 0x85], "Canon"),
    ([0x00, 0x00, 0xaa], "Xerox"),
    ([0x00, 0x00, 0x48], "Epson"),
    ([0x00, 0x16, 0x3e], "Xen"),
];

pub fn vendor_of(mac: &MacAddress) -> Option<&'static str> {
    let oui = mac.oui();
    VENDOR_OUIS
        .iter()
        .find(|(prefix, _)| *prefix == oui)
        .map(|(_, vendor)| *vendor)
}

/// Look up every prefix registered for a vendor (case-insensitive)
pub fn ouis_for_vendor(vendor: &str) -> Vec<[u8; 3]> {
    VENDOR_OUIS
        .iter()
        .filter(|(_, name)| name.eq_ignore_ascii_case(vendor))
        .map(|(oui, _)| *oui)
        .collect()
}

pub fn generate_with_oui(oui: [u8; 3], rng: &mut impl Rng) -> MacAddress {
    MacAddress::new([
        oui[0] & !0x01,
        oui[1],
        oui[2],
        rng.gen(),
        rng.gen(),
        rng.gen(),
    ])
}

pub fn generate_realistic_with(rng: &mut impl Rng) -> MacAddress {
    let (oui, _) = VENDOR_OUIS
        .choose(rng)
        .copied()
        .unwrap_or(([0x00, 0x16, 0x3e], "Xen"));
    generate_with_oui(oui, rng)
}

pub fn generate_random_with(rng: &mut impl Rng) -> MacAddress {
    let mut octets: [u8; 6] = rng.gen();
    octets[0] = (octets[0] | 0x02) & !0x01;
    MacAddress::new(octets)
}

/// Vendor-prefixed unicast address
pub fn generate_realistic() -> MacAddress {
    generate_realistic_with(&mut rand::thread_rng())
}

/// Locally administered unicast address
pub fn generate_random() -> MacAddress {
    generate_random_with(&mut rand::thread_rng())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_realistic_uses_known_vendor() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..200 {
            let mac = generate_realistic_with(&mut rng);
            assert!(mac.is_unicast());
            assert!(vendor_of(&mac).is_some(), "{mac}");
        }
    }

    #[test]
    fn test_random_is_local_unicast() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let mac = generate_random_with(&mut rng);
            assert!(mac.is_unicast());
            assert!(mac.is_locally_administered());
        }
    }

    #[test]
    fn test_generate_with_oui_keeps_prefix_and_clears_multicast() {
        let mut rng = StdRng::seed_from_u64(1);
        let mac = generate_with_oui([0x01, 0x50, 0x56], &mut rng);
        assert_eq!(mac.oui(), [0x00, 0x50, 0x56]);
    }

    #[test]
    fn test_seeded_generation_is_deterministic() {
        let a = generate_realistic_with(&mut StdRng::seed_from_u64(9));
        let b = generate_realistic_with(&mut StdRng::seed_from_u64(9));
        assert_eq!(a, b);
    }

    #[test]
    fn test_vendor_lookup() {
        let mac: MacAddress = "00:50:56:12:34:56".parse().unwrap();
        assert_eq!(vendor_of(&mac), Some("VMware"));
        assert_eq!(ouis_for_vendor("vmware").len(), 2);
        assert!(ouis_for_vendor("nobody").is_empty());
    }

    #[test]
    fn test_table_prefixes_are_unicast() {
        for (oui, vendor) in VENDOR_OUIS {
            assert_eq!(oui[0] & 0x01, 0, "{vendor}");
        }
    }
}
