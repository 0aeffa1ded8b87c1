use crate::error::FormatError;

const HUFFMAN_EOF_SYMBOL: usize = 256;
const HUFFMAN_MAX_SYMBOLS: usize = HUFFMAN_EOF_SYMBOL + 1;
const HUFFMAN_MAX_NODES: usize = HUFFMAN_MAX_SYMBOLS * 2 - 1;
const NO_LEAF: u16 = u16::MAX;

/// Byte frequencies measured on game traffic, shared by every peer.
#[rustfmt::skip]
const FREQUENCY_TABLE: [u32; HUFFMAN_MAX_SYMBOLS] = [
    1 << 30, 4545, 2657, 431, 1950, 919, 444, 482, 2244, 617, 838, 542, 715, 1814, 304, 240, 754, 212, 647, 186,
    283, 131, 146, 166, 543, 164, 167, 136, 179, 859, 363, 113, 157, 154, 204, 108, 137, 180, 202, 176,
    872, 404, 168, 134, 151, 111, 113, 109, 120, 126, 129, 100, 41, 20, 16, 22, 18, 18, 17, 19,
    16, 37, 13, 21, 362, 166, 99, 78, 95, 88, 81, 70, 83, 284, 91, 187, 77, 68, 52, 68,
    59, 66, 61, 638, 71, 157, 50, 46, 69, 43, 11, 24, 13, 19, 10, 12, 12, 20, 14, 9,
    20, 20, 10, 10, 15, 15, 12, 12, 7, 19, 15, 14, 13, 18, 35, 19, 17, 14, 8, 5,
    15, 17, 9, 15, 14, 18, 8, 10, 2173, 134, 157, 68, 188, 60, 170, 60, 194, 62, 175, 71,
    148, 67, 167, 78, 211, 67, 156, 69, 1674, 90, 174, 53, 147, 89, 181, 51, 174, 63, 163, 80,
    167, 94, 128, 122, 223, 153, 218, 77, 200, 110, 190, 73, 174, 69, 145, 66, 277, 143, 141, 60,
    136, 53, 180, 57, 142, 57, 158, 61, 166, 112, 152, 92, 26, 22, 21, 28, 20, 26, 30, 21,
    32, 27, 20, 17, 23, 21, 30, 22, 22, 21, 27, 25, 17, 27, 23, 18, 39, 26, 15, 21,
    12, 18, 18, 27, 20, 18, 15, 19, 11, 17, 33, 12, 18, 15, 19, 18, 16, 26, 17, 18,
    9, 10, 25, 22, 22, 17, 20, 16, 6, 16, 15, 20, 14, 18, 24, 335, 1517,
];

#[derive(Debug, Clone, Copy)]
struct Node {
    bits: u32,
    num_bits: u32,
    leafs: [u16; 2],
    symbol: u16,
}

impl Node {
    fn is_leaf(&self) -> bool {
        self.leafs[0] == NO_LEAF && self.leafs[1] == NO_LEAF
    }
}

/// Static huffman codec. Both peers build the same tree from [`FREQUENCY_TABLE`],
/// so no tree is ever transmitted.
#[derive(Debug, Clone)]
pub struct Huffman {
    nodes: Vec<Node>,
    start_node: u16,
}

impl Default for Huffman {
    fn default() -> Self {
        Self::new()
    }
}

impl Huffman {
    pub fn new() -> Self {
        Self::with_frequencies(&FREQUENCY_TABLE)
    }

    /// Builds the tree from a frequency table. The end of stream frequency is always 1.
    pub fn with_frequencies(frequencies: &[u32; HUFFMAN_MAX_SYMBOLS]) -> Self {
        let mut nodes = Vec::with_capacity(HUFFMAN_MAX_NODES);
        // (frequency, node id) of the subtrees still waiting to be merged
        let mut nodes_left: Vec<(u32, u16)> = Vec::with_capacity(HUFFMAN_MAX_SYMBOLS);

        for (symbol, &frequency) in frequencies.iter().enumerate() {
            nodes.push(Node {
                bits: 0,
                num_bits: 0,
                leafs: [NO_LEAF; 2],
                symbol: symbol as u16,
            });
            let frequency = if symbol == HUFFMAN_EOF_SYMBOL { 1 } else { frequency };
            nodes_left.push((frequency, symbol as u16));
        }

        while nodes_left.len() > 1 {
            sort_descending(&mut nodes_left);

            let (last_frequency, last_id) = nodes_left[nodes_left.len() - 1];
            let (second_frequency, second_id) = nodes_left[nodes_left.len() - 2];
            let new_id = nodes.len() as u16;
            nodes.push(Node {
                bits: 0,
                num_bits: 0,
                leafs: [last_id, second_id],
                symbol: 0,
            });

            let second = nodes_left.len() - 2;
            nodes_left[second] = (last_frequency.saturating_add(second_frequency), new_id);
            nodes_left.pop();
        }

        let start_node = (nodes.len() - 1) as u16;
        let mut huffman = Self { nodes, start_node };
        huffman.set_bits(start_node, 0, 0);
        huffman
    }

    fn set_bits(&mut self, node_id: u16, bits: u32, depth: u32) {
        let node = self.nodes[node_id as usize];
        if node.leafs[1] != NO_LEAF {
            self.set_bits(node.leafs[1], bits | (1 << depth), depth + 1);
        }
        if node.leafs[0] != NO_LEAF {
            self.set_bits(node.leafs[0], bits, depth + 1);
        }

        if node.is_leaf() {
            let node = &mut self.nodes[node_id as usize];
            node.bits = bits;
            node.num_bits = depth;
        }
    }

    /// Encodes `input` followed by the end of stream symbol. Bits are packed least significant first.
    pub fn compress(&self, input: &[u8]) -> Vec<u8> {
        let mut output = Vec::with_capacity(input.len());
        let mut bits: u64 = 0;
        let mut bit_count: u32 = 0;

        let symbols = input.iter().map(|&b| b as usize).chain(std::iter::once(HUFFMAN_EOF_SYMBOL));
        for symbol in symbols {
            let node = &self.nodes[symbol];
            bits |= (node.bits as u64) << bit_count;
            bit_count += node.num_bits;

            while bit_count >= 8 {
                output.push((bits & 0xff) as u8);
                bits >>= 8;
                bit_count -= 8;
            }
        }

        // The last byte is written even when empty
        output.push((bits & 0xff) as u8);

        output
    }

    /// Decodes a stream produced by [`Huffman::compress`].
    /// Fails if the input ends before the end of stream symbol or the output exceeds `max_output`.
    pub fn decompress(&self, input: &[u8], max_output: usize) -> Result<Vec<u8>, FormatError> {
        let mut output = Vec::with_capacity(max_output.min(input.len() * 4));
        let mut bytes = input.iter();
        let mut bits: u32 = 0;
        let mut bit_count: u32 = 0;

        loop {
            let mut node = &self.nodes[self.start_node as usize];
            while !node.is_leaf() {
                if bit_count == 0 {
                    match bytes.next() {
                        Some(&byte) => {
                            bits = byte as u32;
                            bit_count = 8;
                        }
                        None => return Err(FormatError::UnexpectedEndOfStream),
                    }
                }

                node = &self.nodes[node.leafs[(bits & 1) as usize] as usize];
                bits >>= 1;
                bit_count -= 1;
            }

            if node.symbol as usize == HUFFMAN_EOF_SYMBOL {
                return Ok(output);
            }

            if output.len() >= max_output {
                return Err(FormatError::OutputOverflow(max_output));
            }
            output.push(node.symbol as u8);
        }
    }
}

/// Stable bubble sort, highest frequency first. Equal frequencies keep their order
/// so every peer builds the exact same tree.
fn sort_descending(list: &mut [(u32, u16)]) {
    let mut size = list.len();
    let mut changed = true;
    while changed {
        changed = false;
        for i in 0..size.saturating_sub(1) {
            if list[i].0 < list[i + 1].0 {
                list.swap(i, i + 1);
                changed = true;
            }
        }
        size = size.saturating_sub(1);
    }
}
