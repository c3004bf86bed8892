use common_types::{PackedPixel, Palette, PalettizeError, MAX_PALETTE_COLORS};
use tracing::debug;

use crate::strategy::{color_distance_sq, PaletteStrategy};

const MAX_DEPTH: usize = 8;

/// Octree color reducer.
///
/// The observation pass inserts every pixel into an octree keyed by the high
/// bits of its R/G/B channels; whenever the leaf count exceeds the color
/// budget, the deepest reducible node folds its children into itself. Leaves
/// therefore merge continuously and the 256-entry palette ceiling is never
/// reached, let alone exceeded. The palette entry for a leaf is the mean of
/// every pixel that landed in it.
pub struct OctreeStrategy {
    max_colors: usize,
    max_depth: usize,
    nodes: Vec<Node>,
    // Internal (reducible) node indices, grouped by tree level.
    reducible: Vec<Vec<usize>>,
    leaf_count: usize,
    palette: Vec<PackedPixel>,
}

#[derive(Clone)]
struct Node {
    children: [Option<usize>; 8],
    red: u64,
    green: u64,
    blue: u64,
    alpha: u64,
    pixel_count: u64,
    leaf: bool,
    palette_index: u8,
}

impl Default for Node {
    fn default() -> Self {
        Self {
            children: [None; 8],
            red: 0,
            green: 0,
            blue: 0,
            alpha: 0,
            pixel_count: 0,
            leaf: false,
            palette_index: 0,
        }
    }
}

impl OctreeStrategy {
    pub fn new(max_colors: usize) -> Self {
        let mut strategy = Self {
            max_colors: max_colors.clamp(1, MAX_PALETTE_COLORS),
            max_depth: MAX_DEPTH,
            nodes: Vec::new(),
            reducible: Vec::new(),
            leaf_count: 0,
            palette: Vec::new(),
        };
        strategy.reset();
        strategy
    }

    /// Cap the tree depth (1..=8). Shallower trees merge earlier and trade
    /// fidelity for memory.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth.clamp(1, MAX_DEPTH);
        self.reset();
        self
    }

    fn alloc_node(&mut self) -> usize {
        self.nodes.push(Node::default());
        self.nodes.len() - 1
    }

    /// Child slot for `pixel` at `level`, from the level-th highest bit of
    /// each color channel.
    fn branch_index(pixel: PackedPixel, level: usize) -> usize {
        let bit = 7 - level as u32;
        let r = (pixel.red as usize >> bit) & 1;
        let g = (pixel.green as usize >> bit) & 1;
        let b = (pixel.blue as usize >> bit) & 1;
        (r << 2) | (g << 1) | b
    }

    /// Fold the deepest reducible node's children into it. The deepest
    /// non-empty level only holds nodes whose children are all leaves.
    fn reduce(&mut self) {
        for level in (0..self.max_depth).rev() {
            let Some(index) = self.reducible[level].pop() else {
                continue;
            };
            let children = self.nodes[index].children;
            let mut merged_leaves = 0;
            for child in children.into_iter().flatten() {
                let child_node = self.nodes[child].clone();
                let node = &mut self.nodes[index];
                node.red += child_node.red;
                node.green += child_node.green;
                node.blue += child_node.blue;
                node.alpha += child_node.alpha;
                node.pixel_count += child_node.pixel_count;
                merged_leaves += 1;
            }
            let node = &mut self.nodes[index];
            node.children = [None; 8];
            node.leaf = true;
            self.leaf_count = self.leaf_count - merged_leaves + 1;
            return;
        }
    }

    fn leaf_color(node: &Node) -> PackedPixel {
        let count = node.pixel_count.max(1);
        PackedPixel::from_rgba(
            (node.red / count) as u8,
            (node.green / count) as u8,
            (node.blue / count) as u8,
            (node.alpha / count) as u8,
        )
    }
}

impl PaletteStrategy for OctreeStrategy {
    fn reset(&mut self) {
        self.nodes.clear();
        self.nodes.push(Node::default());
        self.reducible = vec![Vec::new(); self.max_depth];
        self.reducible[0].push(0);
        self.leaf_count = 0;
        self.palette.clear();
    }

    fn observe(&mut self, pixel: PackedPixel) -> Result<(), PalettizeError> {
        let mut node = 0;
        for level in 0..self.max_depth {
            if self.nodes[node].leaf {
                break;
            }
            let branch = Self::branch_index(pixel, level);
            node = match self.nodes[node].children[branch] {
                Some(child) => child,
                None => {
                    let child = self.alloc_node();
                    if level + 1 == self.max_depth {
                        self.nodes[child].leaf = true;
                        self.leaf_count += 1;
                    } else {
                        self.reducible[level + 1].push(child);
                    }
                    self.nodes[node].children[branch] = Some(child);
                    child
                }
            };
        }
        let target = &mut self.nodes[node];
        target.red += pixel.red as u64;
        target.green += pixel.green as u64;
        target.blue += pixel.blue as u64;
        target.alpha += pixel.alpha as u64;
        target.pixel_count += 1;

        while self.leaf_count > self.max_colors {
            self.reduce();
        }
        Ok(())
    }

    fn classify(&mut self, pixel: PackedPixel) -> Result<u8, PalettizeError> {
        let mut node = 0;
        for level in 0..self.max_depth {
            if self.nodes[node].leaf {
                return Ok(self.nodes[node].palette_index);
            }
            let branch = Self::branch_index(pixel, level);
            match self.nodes[node].children[branch] {
                Some(child) => node = child,
                // Color never observed on this path: nearest palette entry.
                None => break,
            }
        }
        if self.nodes[node].leaf {
            return Ok(self.nodes[node].palette_index);
        }
        self.palette
            .iter()
            .enumerate()
            .min_by_key(|(_, entry)| color_distance_sq(pixel, **entry))
            .map(|(index, _)| index as u8)
            .ok_or_else(|| PalettizeError::ResourceState {
                message: "octree classify called before build_palette".to_string(),
            })
    }

    fn build_palette(&mut self, mut previous: Palette) -> Result<Palette, PalettizeError> {
        previous.clear();
        self.palette.clear();

        // Depth-first, fixed child order, so index assignment is
        // deterministic for a given observation sequence.
        let mut stack = vec![0usize];
        while let Some(index) = stack.pop() {
            if self.nodes[index].leaf {
                if self.nodes[index].pixel_count == 0 {
                    continue;
                }
                let color = Self::leaf_color(&self.nodes[index]);
                let palette_index = previous.push(color)?;
                self.nodes[index].palette_index = palette_index;
                self.palette.push(color);
            } else {
                for child in self.nodes[index].children.iter().rev().flatten() {
                    stack.push(*child);
                }
            }
        }

        debug!(
            leaves = self.leaf_count,
            palette = previous.len(),
            "octree palette materialized"
        );
        Ok(previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn few_colors_survive_exactly() {
        let mut strategy = OctreeStrategy::new(16);
        let colors = [
            PackedPixel::opaque(255, 0, 0),
            PackedPixel::opaque(0, 255, 0),
            PackedPixel::opaque(0, 0, 255),
            PackedPixel::opaque(255, 255, 255),
        ];
        for color in colors {
            for _ in 0..10 {
                strategy.observe(color).unwrap();
            }
        }
        let palette = strategy.build_palette(Palette::new()).unwrap();
        assert_eq!(palette.len(), colors.len());
        for color in colors {
            let index = strategy.classify(color).unwrap();
            assert_eq!(palette.get(index).unwrap(), color);
        }
    }

    #[test]
    fn leaf_count_respects_budget() {
        let mut strategy = OctreeStrategy::new(8);
        for r in (0..=255u16).step_by(5) {
            for g in (0..=255u16).step_by(51) {
                strategy
                    .observe(PackedPixel::opaque(r as u8, g as u8, 128))
                    .unwrap();
            }
        }
        let palette = strategy.build_palette(Palette::new()).unwrap();
        assert!(palette.len() <= 8, "palette has {} entries", palette.len());
        assert!(!palette.is_empty());
    }

    #[test]
    fn classify_is_deterministic() {
        let mut strategy = OctreeStrategy::new(4);
        for value in 0..=255u16 {
            strategy
                .observe(PackedPixel::opaque(value as u8, 0, 255 - value as u8))
                .unwrap();
        }
        strategy.build_palette(Palette::new()).unwrap();
        let probe = PackedPixel::opaque(100, 0, 155);
        let first = strategy.classify(probe).unwrap();
        for _ in 0..5 {
            assert_eq!(strategy.classify(probe).unwrap(), first);
        }
    }

    #[test]
    fn reset_discards_the_tree() {
        let mut strategy = OctreeStrategy::new(16);
        strategy.observe(PackedPixel::opaque(1, 2, 3)).unwrap();
        strategy.reset();
        strategy.observe(PackedPixel::opaque(200, 100, 50)).unwrap();
        let palette = strategy.build_palette(Palette::new()).unwrap();
        assert_eq!(palette.len(), 1);
        assert_eq!(palette.get(0).unwrap(), PackedPixel::opaque(200, 100, 50));
    }

    #[test]
    fn shallow_tree_merges_more() {
        let mut strategy = OctreeStrategy::new(256).with_max_depth(2);
        for value in 0..=255u16 {
            strategy.observe(PackedPixel::opaque(value as u8, 0, 0)).unwrap();
        }
        let palette = strategy.build_palette(Palette::new()).unwrap();
        // Depth 2 can distinguish at most 2 bits of each channel.
        assert!(palette.len() <= 16);
    }
}
