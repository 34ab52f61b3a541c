// Copyright 2019 Parity Technologies (UK) Ltd.
//
// Permission is hereby granted, free of charge, to any person obtaining a
// copy of this software and associated documentation files (the "Software"),
// to deal in the Software without restriction, including without limitation
// the rights to use, copy, modify, merge, publish, distribute, sublicense,
// and/or sell copies of the Software, and to permit persons to whom the
// Software is furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS
// OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
// DEALINGS IN THE SOFTWARE.

//! A `Key` identifies both the nodes participating in the Kademlia DHT, as well as
//! records stored in the DHT, in the XOR `KeySpace`.

use enr::NodeId;
use std::hash::{Hash, Hasher};

/// A `Key` is a cryptographic hash identifying both the nodes participating in
/// the discv5 DHT, as well as records stored in the DHT.
///
/// The set of all `Key`s defines the XOR `KeySpace`. `Key`s have an XOR metric as
/// defined in the Kademlia paper, i.e. the bitwise XOR of the hash digests, interpreted
/// as a 256-bit unsigned integer.
#[derive(Clone, Debug)]
pub struct Key<T> {
    preimage: T,
    hash: [u8; 32],
}

impl<T> PartialEq for Key<T> {
    fn eq(&self, other: &Key<T>) -> bool {
        self.hash == other.hash
    }
}

impl<T> Eq for Key<T> {}

impl<T> Hash for Key<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash.hash(state)
    }
}

impl<T> AsRef<Key<T>> for Key<T> {
    fn as_ref(&self) -> &Key<T> {
        self
    }
}

impl<T> Key<T> {
    /// Borrows the preimage of the key.
    pub fn preimage(&self) -> &T {
        &self.preimage
    }

    /// Converts the key into its preimage.
    pub fn into_preimage(self) -> T {
        self.preimage
    }

    /// Computes the distance of the keys according to the XOR metric.
    pub fn distance<U>(&self, other: &U) -> Distance
    where
        U: AsRef<Key<T>>,
    {
        let other = other.as_ref();
        let mut xor = [0u8; 32];
        for i in 0..32 {
            xor[i] = self.hash[i] ^ other.hash[i];
        }
        Distance(xor)
    }

    /// The `log2` distance to the other key, i.e. the bucket index an entry at
    /// this key would occupy relative to `other`. `None` iff the keys are equal.
    pub fn log2_distance<U>(&self, other: &U) -> Option<usize>
    where
        U: AsRef<Key<T>>,
    {
        self.distance(other).log2()
    }
}

impl From<NodeId> for Key<NodeId> {
    fn from(node_id: NodeId) -> Self {
        let hash = node_id.raw();
        Key {
            preimage: node_id,
            hash,
        }
    }
}

impl Key<NodeId> {
    /// Builds a `Key` from a `NodeId`.
    pub fn new(node_id: NodeId) -> Self {
        node_id.into()
    }
}

/// A distance between two `Key`s in the XOR `KeySpace`.
///
/// The distance is stored as a 256-bit big-endian value so that comparisons
/// between distances agree with the usual integer ordering.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Default, Hash)]
pub struct Distance(pub(super) [u8; 32]);

impl Distance {
    /// Returns the position of the highest set bit, i.e. `floor(log2(d))`, or
    /// `None` if the distance is zero (the two keys are identical).
    pub fn log2(&self) -> Option<usize> {
        for (byte_index, byte) in self.0.iter().enumerate() {
            if *byte != 0 {
                let bit_index = 7 - byte.leading_zeros() as usize;
                return Some((31 - byte_index) * 8 + bit_index + 1);
            }
        }
        None
    }

    /// `true` iff this distance is zero.
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_id(byte: u8) -> NodeId {
        NodeId::new(&[byte; 32])
    }

    #[test]
    fn distance_to_self_is_zero() {
        let k = Key::from(node_id(7));
        assert!(k.distance(&k).is_zero());
        assert_eq!(k.log2_distance(&k), None);
    }

    #[test]
    fn log2_distance_is_highest_set_bit() {
        let a = Key::from(NodeId::new(&[0u8; 32]));
        let mut other = [0u8; 32];
        other[31] = 0b0000_0001;
        let b = Key::from(NodeId::new(&other));
        // Only the lowest bit differs: log2 distance is 1.
        assert_eq!(a.log2_distance(&b), Some(1));

        let mut other2 = [0u8; 32];
        other2[0] = 0b1000_0000;
        let c = Key::from(NodeId::new(&other2));
        // The highest bit of the highest byte differs: log2 distance is 256.
        assert_eq!(a.log2_distance(&c), Some(256));
    }

    #[test]
    fn distance_ordering_matches_integer_ordering() {
        let a = Key::from(NodeId::new(&[0u8; 32]));
        let mut one = [0u8; 32];
        one[31] = 1;
        let mut two = [0u8; 32];
        two[31] = 2;
        let b = Key::from(NodeId::new(&one));
        let c = Key::from(NodeId::new(&two));
        assert!(a.distance(&b) < a.distance(&c));
    }
}
