use std::ops::RangeInclusive;

use crate::{BitManipulation, DataAccess};

pub const SCREEN_WIDTH: usize = 240;
pub const SCREEN_HEIGHT: usize = 160;

const VISIBLE_LINE_CYCLES: u32 = 960;
const HBLANK_CYCLES: u32 = 272;
const VBLANK_START_LINE: u16 = 160;
const LINES_PER_FRAME: u16 = 228;

const VRAM_SIZE: usize = 0x18000;
const PALETTE_RAM_SIZE: usize = 0x400;
const OAM_SIZE: usize = 0x400;

const OBJ_TILE_BASE: usize = 0x10000;
const FORCED_BLANK_COLOR: u16 = 0x7FFF;

#[derive(Clone, Copy, Debug, Default)]
pub struct LcdEvents {
    pub hblank_entered: bool,
    pub hblank_dma: bool, // HBlank DMA only triggers on visible lines
    pub vblank_entered: bool,
    pub vcount_matched: bool,
    pub frame_completed: bool,
}

impl LcdEvents {
    fn merge(&mut self, other: LcdEvents) {
        self.hblank_entered |= other.hblank_entered;
        self.hblank_dma |= other.hblank_dma;
        self.vblank_entered |= other.vblank_entered;
        self.vcount_matched |= other.vcount_matched;
        self.frame_completed |= other.frame_completed;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Layer {
    Background(usize),
    Object,
    Backdrop,
}

#[derive(Clone, Copy, Debug)]
struct Candidate {
    color: u16,
    priority: u16,
    layer: Layer,
    semi_transparent: bool,
}

#[derive(Clone, Copy, Debug)]
struct ObjPixel {
    color: u16,
    priority: u16,
    semi_transparent: bool,
}

#[derive(Clone, Copy, Debug)]
enum ColorEffect {
    None,
    AlphaBlending,
    BrightnessIncrease,
    BrightnessDecrease,
}

#[derive(Clone, Debug, Default)]
struct Background {
    control: u16,
    h_offset: u16,
    v_offset: u16,
}

impl Background {
    const PRIORITY_BIT_RANGE: RangeInclusive<usize> = 0..=1;
    const CHAR_BASE_BIT_RANGE: RangeInclusive<usize> = 2..=3;
    const EIGHT_BPP_BIT_INDEX: usize = 7;
    const SCREEN_BASE_BIT_RANGE: RangeInclusive<usize> = 8..=12;
    const WRAPAROUND_BIT_INDEX: usize = 13;
    const SIZE_BIT_RANGE: RangeInclusive<usize> = 14..=15;

    fn priority(&self) -> u16 {
        self.control.get_bit_range(Self::PRIORITY_BIT_RANGE)
    }

    fn char_base(&self) -> usize {
        usize::from(self.control.get_bit_range(Self::CHAR_BASE_BIT_RANGE)) * 0x4000
    }

    fn screen_base(&self) -> usize {
        usize::from(self.control.get_bit_range(Self::SCREEN_BASE_BIT_RANGE)) * 0x800
    }

    fn eight_bpp(&self) -> bool {
        self.control.get_bit(Self::EIGHT_BPP_BIT_INDEX)
    }

    fn wraparound(&self) -> bool {
        self.control.get_bit(Self::WRAPAROUND_BIT_INDEX)
    }

    fn size_index(&self) -> u16 {
        self.control.get_bit_range(Self::SIZE_BIT_RANGE)
    }
}

// BG2/BG3 rotation/scaling state. The reference point registers are latched
// into the internal accumulators on write and at the start of each frame; the
// accumulators advance by PB/PD once per rendered line.
#[derive(Clone, Debug, Default)]
struct AffineState {
    params: [u16; 4], // PA, PB, PC, PD
    reference_x: u32,
    reference_y: u32,
    internal_x: i32,
    internal_y: i32,
}

fn sign_extend_28(value: u32) -> i32 {
    ((value as i32) << 4) >> 4
}

impl AffineState {
    fn param(&self, index: usize) -> i32 {
        i32::from(self.params[index] as i16)
    }

    fn write_param<T>(&mut self, value: T, index: usize, byte: u32)
    where
        u16: DataAccess<T>,
    {
        self.params[index] = self.params[index].set_data(value, byte);
    }

    fn write_reference_x(&mut self, value: u8, byte: u32) {
        self.reference_x = self.reference_x.set_data(value, byte);
        self.internal_x = sign_extend_28(self.reference_x);
    }

    fn write_reference_y(&mut self, value: u8, byte: u32) {
        self.reference_y = self.reference_y.set_data(value, byte);
        self.internal_y = sign_extend_28(self.reference_y);
    }

    fn latch(&mut self) {
        self.internal_x = sign_extend_28(self.reference_x);
        self.internal_y = sign_extend_28(self.reference_y);
    }

    fn advance_line(&mut self) {
        self.internal_x += self.param(1);
        self.internal_y += self.param(3);
    }
}

pub struct Lcd {
    control: u16,
    status: u16,
    vcount: u16,
    backgrounds: [Background; 4],
    affine: [AffineState; 2],
    window_horizontal: [u16; 2],
    window_vertical: [u16; 2],
    window_in: u16,
    window_out: u16,
    mosaic: u32,
    blend_control: u16,
    blend_alpha: u16,
    blend_brightness: u16,

    palette_ram: Box<[u8; PALETTE_RAM_SIZE]>,
    vram: Box<[u8; VRAM_SIZE]>,
    oam: Box<[u8; OAM_SIZE]>,
    frame_buffer: Box<[u16; SCREEN_WIDTH * SCREEN_HEIGHT]>,

    line_cycles: u32,
    in_hblank: bool,
}

impl Default for Lcd {
    fn default() -> Self {
        Self {
            // Forced blank until the guest configures the display.
            control: 0x0080,
            status: 0,
            vcount: 0,
            backgrounds: Default::default(),
            affine: Default::default(),
            window_horizontal: [0; 2],
            window_vertical: [0; 2],
            window_in: 0,
            window_out: 0,
            mosaic: 0,
            blend_control: 0,
            blend_alpha: 0,
            blend_brightness: 0,

            palette_ram: Box::new([0; PALETTE_RAM_SIZE]),
            vram: Box::new([0; VRAM_SIZE]),
            oam: Box::new([0; OAM_SIZE]),
            frame_buffer: Box::new([0; SCREEN_WIDTH * SCREEN_HEIGHT]),

            line_cycles: 0,
            in_hblank: false,
        }
    }
}

impl Lcd {
    const BG_MODE_BIT_RANGE: RangeInclusive<usize> = 0..=2;
    const FRAME_SELECT_BIT_INDEX: usize = 4;
    const OBJ_ONE_DIMENSIONAL_BIT_INDEX: usize = 6;
    const FORCED_BLANK_BIT_INDEX: usize = 7;
    const SCREEN_DISPLAY_BG0_BIT_INDEX: usize = 8;
    const SCREEN_DISPLAY_OBJ_BIT_INDEX: usize = 12;
    const WINDOW_0_DISPLAY_BIT_INDEX: usize = 13;
    const WINDOW_1_DISPLAY_BIT_INDEX: usize = 14;
    const OBJ_WINDOW_DISPLAY_BIT_INDEX: usize = 15;

    const VBLANK_FLAG_BIT_INDEX: usize = 0;
    const HBLANK_FLAG_BIT_INDEX: usize = 1;
    const VCOUNT_FLAG_BIT_INDEX: usize = 2;
    const VBLANK_IRQ_ENABLE_BIT_INDEX: usize = 3;
    const HBLANK_IRQ_ENABLE_BIT_INDEX: usize = 4;
    const VCOUNT_IRQ_ENABLE_BIT_INDEX: usize = 5;
    const VCOUNT_SETTING_BIT_RANGE: RangeInclusive<usize> = 8..=15;

    pub fn step(&mut self, cycles: u32) -> LcdEvents {
        let mut events = LcdEvents::default();
        self.line_cycles += cycles;

        loop {
            let transition = if self.in_hblank {
                if self.line_cycles < HBLANK_CYCLES {
                    break;
                }
                self.line_cycles -= HBLANK_CYCLES;
                self.leave_hblank()
            } else {
                if self.line_cycles < VISIBLE_LINE_CYCLES {
                    break;
                }
                self.line_cycles -= VISIBLE_LINE_CYCLES;
                self.enter_hblank()
            };

            events.merge(transition);
        }

        events
    }

    fn enter_hblank(&mut self) -> LcdEvents {
        let mut events = LcdEvents::default();

        self.in_hblank = true;
        self.status = self.status.set_bit(Self::HBLANK_FLAG_BIT_INDEX, true);
        events.hblank_entered = true;

        if self.vcount < VBLANK_START_LINE {
            self.render_scanline(self.vcount);
            for affine in self.affine.iter_mut() {
                affine.advance_line();
            }
            events.hblank_dma = true;
        }

        events
    }

    fn leave_hblank(&mut self) -> LcdEvents {
        let mut events = LcdEvents::default();

        self.in_hblank = false;
        self.status = self.status.set_bit(Self::HBLANK_FLAG_BIT_INDEX, false);
        self.vcount += 1;

        if self.vcount == VBLANK_START_LINE {
            self.status = self.status.set_bit(Self::VBLANK_FLAG_BIT_INDEX, true);
            events.vblank_entered = true;
        }

        if self.vcount >= LINES_PER_FRAME {
            self.vcount = 0;
            self.status = self.status.set_bit(Self::VBLANK_FLAG_BIT_INDEX, false);
            events.frame_completed = true;

            for affine in self.affine.iter_mut() {
                affine.latch();
            }
        }

        let matched = self.vcount == self.status.get_bit_range(Self::VCOUNT_SETTING_BIT_RANGE);
        self.status = self.status.set_bit(Self::VCOUNT_FLAG_BIT_INDEX, matched);
        events.vcount_matched = matched;

        events
    }

    pub fn vblank_irq_enabled(&self) -> bool {
        self.status.get_bit(Self::VBLANK_IRQ_ENABLE_BIT_INDEX)
    }

    pub fn hblank_irq_enabled(&self) -> bool {
        self.status.get_bit(Self::HBLANK_IRQ_ENABLE_BIT_INDEX)
    }

    pub fn vcount_irq_enabled(&self) -> bool {
        self.status.get_bit(Self::VCOUNT_IRQ_ENABLE_BIT_INDEX)
    }

    pub fn frame_buffer(&self) -> &[u16; SCREEN_WIDTH * SCREEN_HEIGHT] {
        &self.frame_buffer
    }

    pub fn vcount(&self) -> u16 {
        self.vcount
    }
}

// Scanline composition.
impl Lcd {
    fn render_scanline(&mut self, line: u16) {
        let y = usize::from(line);
        let mut row = [0u16; SCREEN_WIDTH];

        if self.control.get_bit(Self::FORCED_BLANK_BIT_INDEX) {
            row.fill(FORCED_BLANK_COLOR);
            self.frame_buffer[y * SCREEN_WIDTH..(y + 1) * SCREEN_WIDTH].copy_from_slice(&row);
            return;
        }

        let mode = self.control.get_bit_range(Self::BG_MODE_BIT_RANGE);
        let backdrop = self.palette_color(0, 0);

        let mut obj_line = [None::<ObjPixel>; SCREEN_WIDTH];
        let mut obj_window_line = [false; SCREEN_WIDTH];
        if self.control.get_bit(Self::SCREEN_DISPLAY_OBJ_BIT_INDEX) {
            self.render_objects(line, mode, &mut obj_line, &mut obj_window_line);
        }

        for x in 0..SCREEN_WIDTH {
            let (layer_mask, effects_allowed) = self.window_controls(x, y, obj_window_line[x]);

            let mut candidates = [None::<Candidate>; 6];
            let mut count = 0;

            if layer_mask.get_bit(4) {
                if let Some(pixel) = obj_line[x] {
                    candidates[count] = Some(Candidate {
                        color: pixel.color,
                        priority: pixel.priority,
                        layer: Layer::Object,
                        semi_transparent: pixel.semi_transparent,
                    });
                    count += 1;
                }
            }

            for bg in 0..4 {
                if !self
                    .control
                    .get_bit(Self::SCREEN_DISPLAY_BG0_BIT_INDEX + bg)
                    || !layer_mask.get_bit(bg)
                {
                    continue;
                }

                if let Some(color) = self.background_pixel(mode, bg, x, y) {
                    candidates[count] = Some(Candidate {
                        color,
                        priority: self.backgrounds[bg].priority(),
                        layer: Layer::Background(bg),
                        semi_transparent: false,
                    });
                    count += 1;
                }
            }

            candidates[count] = Some(Candidate {
                color: backdrop,
                priority: 4,
                layer: Layer::Backdrop,
                semi_transparent: false,
            });

            let (first, second) = top_two_candidates(&candidates);
            row[x] = self.resolve_color_effect(first, second, effects_allowed);
        }

        self.frame_buffer[y * SCREEN_WIDTH..(y + 1) * SCREEN_WIDTH].copy_from_slice(&row);
    }

    fn resolve_color_effect(
        &self,
        first: Candidate,
        second: Option<Candidate>,
        effects_allowed: bool,
    ) -> u16 {
        const EFFECT_BIT_RANGE: RangeInclusive<usize> = 6..=7;

        let effect = match self.blend_control.get_bit_range(EFFECT_BIT_RANGE) {
            0 => ColorEffect::None,
            1 => ColorEffect::AlphaBlending,
            2 => ColorEffect::BrightnessIncrease,
            3 => ColorEffect::BrightnessDecrease,
            _ => unreachable!(),
        };

        let eva = u32::from(self.blend_alpha.get_bit_range(0..=4).min(16));
        let evb = u32::from(self.blend_alpha.get_bit_range(8..=12).min(16));
        let evy = u32::from(self.blend_brightness.get_bit_range(0..=4).min(16));

        // A semi-transparent sprite forces alpha blending against a matching
        // second target, regardless of the selected effect.
        if first.semi_transparent {
            if let Some(second) = second {
                if self.is_second_target(second.layer) {
                    return alpha_blend(first.color, second.color, eva, evb);
                }
            }
        }

        if !effects_allowed {
            return first.color;
        }

        match effect {
            ColorEffect::None => first.color,
            ColorEffect::AlphaBlending => match second {
                Some(second)
                    if self.is_first_target(first.layer) && self.is_second_target(second.layer) =>
                {
                    alpha_blend(first.color, second.color, eva, evb)
                }
                _ => first.color,
            },
            ColorEffect::BrightnessIncrease => {
                if self.is_first_target(first.layer) {
                    brightness_adjust(first.color, evy, true)
                } else {
                    first.color
                }
            }
            ColorEffect::BrightnessDecrease => {
                if self.is_first_target(first.layer) {
                    brightness_adjust(first.color, evy, false)
                } else {
                    first.color
                }
            }
        }
    }

    fn target_bit(layer: Layer) -> usize {
        match layer {
            Layer::Background(bg) => bg,
            Layer::Object => 4,
            Layer::Backdrop => 5,
        }
    }

    fn is_first_target(&self, layer: Layer) -> bool {
        self.blend_control.get_bit(Self::target_bit(layer))
    }

    fn is_second_target(&self, layer: Layer) -> bool {
        self.blend_control.get_bit(8 + Self::target_bit(layer))
    }

    // Which layers (bits 0..3 backgrounds, bit 4 objects) and whether colour
    // effects apply at this pixel, after window gating.
    fn window_controls(&self, x: usize, y: usize, obj_window: bool) -> (u16, bool) {
        let window_0 = self.control.get_bit(Self::WINDOW_0_DISPLAY_BIT_INDEX);
        let window_1 = self.control.get_bit(Self::WINDOW_1_DISPLAY_BIT_INDEX);
        let obj_window_enabled = self.control.get_bit(Self::OBJ_WINDOW_DISPLAY_BIT_INDEX);

        if !window_0 && !window_1 && !obj_window_enabled {
            return (0x1F, true);
        }

        let controls = if window_0 && self.inside_window(0, x, y) {
            self.window_in.get_bit_range(0..=7)
        } else if window_1 && self.inside_window(1, x, y) {
            self.window_in.get_bit_range(8..=15)
        } else if obj_window_enabled && obj_window {
            self.window_out.get_bit_range(8..=15)
        } else {
            self.window_out.get_bit_range(0..=7)
        };

        (controls.get_bit_range(0..=4), controls.get_bit(5))
    }

    fn inside_window(&self, window: usize, x: usize, y: usize) -> bool {
        let horizontal = self.window_horizontal[window];
        let vertical = self.window_vertical[window];

        let x1 = usize::from(horizontal.get_bit_range(8..=15));
        let x2 = usize::from(horizontal.get_bit_range(0..=7));
        let y1 = usize::from(vertical.get_bit_range(8..=15));
        let y2 = usize::from(vertical.get_bit_range(0..=7));

        // Coordinates wrap when the start is past the end.
        let in_horizontal = if x1 <= x2 {
            x >= x1 && x < x2
        } else {
            x >= x1 || x < x2
        };
        let in_vertical = if y1 <= y2 {
            y >= y1 && y < y2
        } else {
            y >= y1 || y < y2
        };

        in_horizontal && in_vertical
    }
}

fn top_two_candidates(candidates: &[Option<Candidate>; 6]) -> (Candidate, Option<Candidate>) {
    let mut first: Option<Candidate> = None;
    let mut second: Option<Candidate> = None;

    for candidate in candidates.iter().flatten() {
        // Strict comparison keeps the fixed OBJ -> BG0..BG3 -> backdrop order
        // as the tie break.
        if first.map_or(true, |best| candidate.priority < best.priority) {
            second = first;
            first = Some(*candidate);
        } else if second.map_or(true, |best| candidate.priority < best.priority) {
            second = Some(*candidate);
        }
    }

    (first.expect("backdrop candidate is always present"), second)
}

fn alpha_blend(first: u16, second: u16, eva: u32, evb: u32) -> u16 {
    let mut result = 0u16;

    for shift in [0, 5, 10] {
        let channel_first = u32::from(first >> shift) & 0x1F;
        let channel_second = u32::from(second >> shift) & 0x1F;
        let blended = ((channel_first * eva + channel_second * evb) / 16).min(31);
        result |= (blended as u16) << shift;
    }

    result
}

fn brightness_adjust(color: u16, evy: u32, increase: bool) -> u16 {
    let mut result = 0u16;

    for shift in [0, 5, 10] {
        let channel = u32::from(color >> shift) & 0x1F;
        let adjusted = if increase {
            channel + ((31 - channel) * evy) / 16
        } else {
            channel - (channel * evy) / 16
        };
        result |= (adjusted.min(31) as u16) << shift;
    }

    result
}

// Background pixel fetch.
impl Lcd {
    fn background_pixel(&self, mode: u16, bg: usize, x: usize, y: usize) -> Option<u16> {
        match (mode, bg) {
            (0, _) | (1, 0) | (1, 1) => self.text_background_pixel(bg, x, y),
            (1, 2) | (2, 2) | (2, 3) => self.affine_background_pixel(bg, x),
            (3, 2) => Some(self.mode3_pixel(x, y)),
            (4, 2) => self.mode4_pixel(x, y),
            (5, 2) => Some(self.mode5_pixel(x, y)),
            _ => None,
        }
    }

    fn text_background_pixel(&self, bg: usize, x: usize, y: usize) -> Option<u16> {
        let background = &self.backgrounds[bg];

        let (width, height) = match background.size_index() {
            0 => (256, 256),
            1 => (512, 256),
            2 => (256, 512),
            3 => (512, 512),
            _ => unreachable!(),
        };

        let sx = (x + usize::from(background.h_offset & 0x1FF)) & (width - 1);
        let sy = (y + usize::from(background.v_offset & 0x1FF)) & (height - 1);

        // 512-wide and 512-tall maps are laid out as extra 32x32 screen
        // blocks after the first.
        let block = match background.size_index() {
            0 => 0,
            1 => usize::from(sx >= 256),
            2 => usize::from(sy >= 256),
            3 => usize::from(sx >= 256) + 2 * usize::from(sy >= 256),
            _ => unreachable!(),
        };

        let tile_x = (sx & 255) / 8;
        let tile_y = (sy & 255) / 8;
        let entry_offset = background.screen_base() + block * 0x800 + (tile_y * 32 + tile_x) * 2;
        let entry = self.vram_halfword(entry_offset);

        let tile = usize::from(entry.get_bit_range(0..=9));
        let horizontal_flip = entry.get_bit(10);
        let vertical_flip = entry.get_bit(11);
        let palette_bank = entry.get_bit_range(12..=15);

        let mut pixel_x = sx & 7;
        let mut pixel_y = sy & 7;
        if horizontal_flip {
            pixel_x = 7 - pixel_x;
        }
        if vertical_flip {
            pixel_y = 7 - pixel_y;
        }

        if background.eight_bpp() {
            let index = self.vram_byte(background.char_base() + tile * 64 + pixel_y * 8 + pixel_x);
            (index != 0).then(|| self.palette_color(0, usize::from(index)))
        } else {
            let byte =
                self.vram_byte(background.char_base() + tile * 32 + pixel_y * 4 + pixel_x / 2);
            let index = if pixel_x & 1 == 0 {
                byte & 0xF
            } else {
                byte >> 4
            };
            (index != 0).then(|| {
                self.palette_color(0, usize::from(palette_bank) * 16 + usize::from(index))
            })
        }
    }

    fn affine_background_pixel(&self, bg: usize, x: usize) -> Option<u16> {
        let background = &self.backgrounds[bg];
        let affine = &self.affine[bg - 2];

        let size = match background.size_index() {
            0 => 128usize,
            1 => 256,
            2 => 512,
            3 => 1024,
            _ => unreachable!(),
        };

        let source_x = affine.internal_x + affine.param(0) * x as i32;
        let source_y = affine.internal_y + affine.param(2) * x as i32;
        let mut texel_x = source_x >> 8;
        let mut texel_y = source_y >> 8;

        if background.wraparound() {
            texel_x = texel_x.rem_euclid(size as i32);
            texel_y = texel_y.rem_euclid(size as i32);
        } else if texel_x < 0 || texel_x >= size as i32 || texel_y < 0 || texel_y >= size as i32 {
            return None;
        }

        let (texel_x, texel_y) = (texel_x as usize, texel_y as usize);

        // Affine maps use one-byte screen entries and always-8bpp tiles.
        let entry_offset = background.screen_base() + (texel_y / 8) * (size / 8) + texel_x / 8;
        let tile = usize::from(self.vram_byte(entry_offset));

        let index =
            self.vram_byte(background.char_base() + tile * 64 + (texel_y & 7) * 8 + (texel_x & 7));
        (index != 0).then(|| self.palette_color(0, usize::from(index)))
    }

    fn bitmap_frame_offset(&self) -> usize {
        if self.control.get_bit(Self::FRAME_SELECT_BIT_INDEX) {
            0xA000
        } else {
            0
        }
    }

    fn mode3_pixel(&self, x: usize, y: usize) -> u16 {
        self.vram_halfword((y * SCREEN_WIDTH + x) * 2)
    }

    fn mode4_pixel(&self, x: usize, y: usize) -> Option<u16> {
        let index = self.vram_byte(self.bitmap_frame_offset() + y * SCREEN_WIDTH + x);
        (index != 0).then(|| self.palette_color(0, usize::from(index)))
    }

    fn mode5_pixel(&self, x: usize, y: usize) -> u16 {
        const MODE5_WIDTH: usize = 160;
        const MODE5_HEIGHT: usize = 128;

        if x >= MODE5_WIDTH || y >= MODE5_HEIGHT {
            return 0;
        }

        self.vram_halfword(self.bitmap_frame_offset() + (y * MODE5_WIDTH + x) * 2)
    }
}

// Object (sprite) rendering.
impl Lcd {
    fn render_objects(
        &self,
        line: u16,
        mode: u16,
        obj_line: &mut [Option<ObjPixel>; SCREEN_WIDTH],
        obj_window_line: &mut [bool; SCREEN_WIDTH],
    ) {
        for index in 0..128 {
            self.render_object(index, line, mode, obj_line, obj_window_line);
        }
    }

    fn render_object(
        &self,
        index: usize,
        line: u16,
        mode: u16,
        obj_line: &mut [Option<ObjPixel>; SCREEN_WIDTH],
        obj_window_line: &mut [bool; SCREEN_WIDTH],
    ) {
        let attribute_0 = self.oam_halfword(index * 8);
        let attribute_1 = self.oam_halfword(index * 8 + 2);
        let attribute_2 = self.oam_halfword(index * 8 + 4);

        let rotation_scaling = attribute_0.get_bit(8);
        let double_size_or_disable = attribute_0.get_bit(9);
        if !rotation_scaling && double_size_or_disable {
            return;
        }

        let object_mode = attribute_0.get_bit_range(10..=11);
        if object_mode == 3 {
            log::warn!("prohibited object mode on OAM entry {}", index);
            return;
        }

        let shape = attribute_0.get_bit_range(14..=15);
        let size_index = attribute_1.get_bit_range(14..=15);
        let Some((width, height)) = object_dimensions(shape, size_index) else {
            return;
        };

        let (bounds_width, bounds_height) = if rotation_scaling && double_size_or_disable {
            (width * 2, height * 2)
        } else {
            (width, height)
        };

        let y_coordinate = attribute_0.get_bit_range(0..=7);
        let row = i32::from(line.wrapping_sub(y_coordinate) & 0xFF);
        if row >= bounds_height {
            return;
        }

        let x_coordinate = usize::from(attribute_1.get_bit_range(0..=8));
        let eight_bpp = attribute_0.get_bit(13);
        let base_tile = usize::from(attribute_2.get_bit_range(0..=9));
        let priority = attribute_2.get_bit_range(10..=11);
        let palette_bank = usize::from(attribute_2.get_bit_range(12..=15));
        let semi_transparent = object_mode == 1;
        let object_window = object_mode == 2;

        let rotation_params = if rotation_scaling {
            let group = usize::from(attribute_1.get_bit_range(9..=13));
            Some([
                i32::from(self.oam_halfword(group * 32 + 6) as i16),
                i32::from(self.oam_halfword(group * 32 + 14) as i16),
                i32::from(self.oam_halfword(group * 32 + 22) as i16),
                i32::from(self.oam_halfword(group * 32 + 30) as i16),
            ])
        } else {
            None
        };

        for column in 0..bounds_width {
            let screen_x = (x_coordinate + column as usize) & 0x1FF;
            if screen_x >= SCREEN_WIDTH {
                continue;
            }

            let (texel_x, texel_y) = match rotation_params {
                Some([pa, pb, pc, pd]) => {
                    let local_x = column - bounds_width / 2;
                    let local_y = row - bounds_height / 2;

                    let texel_x = ((pa * local_x + pb * local_y) >> 8) + width / 2;
                    let texel_y = ((pc * local_x + pd * local_y) >> 8) + height / 2;

                    if texel_x < 0 || texel_x >= width || texel_y < 0 || texel_y >= height {
                        continue;
                    }

                    (texel_x as usize, texel_y as usize)
                }
                None => {
                    let mut texel_x = column as usize;
                    let mut texel_y = row as usize;
                    if attribute_1.get_bit(12) {
                        texel_x = width as usize - 1 - texel_x;
                    }
                    if attribute_1.get_bit(13) {
                        texel_y = height as usize - 1 - texel_y;
                    }
                    (texel_x, texel_y)
                }
            };

            let Some(color_index) =
                self.object_texel(base_tile, texel_x, texel_y, width as usize, eight_bpp, mode)
            else {
                continue;
            };

            let color = if eight_bpp {
                self.palette_color(1, color_index)
            } else {
                self.palette_color(1, palette_bank * 16 + color_index)
            };

            if object_window {
                obj_window_line[screen_x] = true;
                continue;
            }

            // Ascending OAM order plus a strict comparison makes the lower
            // index win priority ties.
            let replace = obj_line[screen_x].map_or(true, |existing| priority < existing.priority);
            if replace {
                obj_line[screen_x] = Some(ObjPixel {
                    color,
                    priority,
                    semi_transparent,
                });
            }
        }
    }

    fn object_texel(
        &self,
        base_tile: usize,
        texel_x: usize,
        texel_y: usize,
        width: usize,
        eight_bpp: bool,
        mode: u16,
    ) -> Option<usize> {
        let tile_stride = if self.control.get_bit(Self::OBJ_ONE_DIMENSIONAL_BIT_INDEX) {
            width / 8 * if eight_bpp { 2 } else { 1 }
        } else {
            32
        };

        let tile = base_tile
            + (texel_y / 8) * tile_stride
            + (texel_x / 8) * if eight_bpp { 2 } else { 1 };
        let tile = tile & 0x3FF;

        // In the bitmap modes the lower half of object VRAM belongs to the
        // backgrounds.
        if mode >= 3 && tile < 512 {
            return None;
        }

        let index = if eight_bpp {
            self.vram_byte(OBJ_TILE_BASE + tile * 32 + (texel_y & 7) * 8 + (texel_x & 7))
        } else {
            let byte =
                self.vram_byte(OBJ_TILE_BASE + tile * 32 + (texel_y & 7) * 4 + (texel_x & 7) / 2);
            if texel_x & 1 == 0 {
                byte & 0xF
            } else {
                byte >> 4
            }
        };

        (index != 0).then_some(usize::from(index))
    }
}

fn object_dimensions(shape: u16, size_index: u16) -> Option<(i32, i32)> {
    let dimensions = match (shape, size_index) {
        (0, 0) => (8, 8),
        (0, 1) => (16, 16),
        (0, 2) => (32, 32),
        (0, 3) => (64, 64),
        (1, 0) => (16, 8),
        (1, 1) => (32, 8),
        (1, 2) => (32, 16),
        (1, 3) => (64, 32),
        (2, 0) => (8, 16),
        (2, 1) => (8, 32),
        (2, 2) => (16, 32),
        (2, 3) => (32, 64),
        _ => return None,
    };

    Some(dimensions)
}

// Raw video memory, reachable both from the bus (guest accesses) and the
// renderer.
impl Lcd {
    fn vram_byte(&self, offset: usize) -> u8 {
        self.vram[offset % VRAM_SIZE]
    }

    fn vram_halfword(&self, offset: usize) -> u16 {
        let offset = offset % VRAM_SIZE;
        u16::from_le_bytes([self.vram[offset], self.vram[(offset + 1) % VRAM_SIZE]])
    }

    fn oam_halfword(&self, offset: usize) -> u16 {
        u16::from_le_bytes([self.oam[offset % OAM_SIZE], self.oam[(offset + 1) % OAM_SIZE]])
    }

    fn palette_color(&self, bank: usize, index: usize) -> u16 {
        let offset = (bank * 0x100 + index) * 2 % PALETTE_RAM_SIZE;
        u16::from_le_bytes([self.palette_ram[offset], self.palette_ram[offset + 1]])
    }

    pub fn read_vram_byte(&self, offset: u32) -> u8 {
        self.vram[offset as usize]
    }

    pub fn write_vram_byte(&mut self, value: u8, offset: u32) {
        self.vram[offset as usize] = value;
    }

    pub fn read_palette_byte(&self, offset: u32) -> u8 {
        self.palette_ram[offset as usize]
    }

    pub fn write_palette_byte(&mut self, value: u8, offset: u32) {
        self.palette_ram[offset as usize] = value;
    }

    pub fn read_oam_byte(&self, offset: u32) -> u8 {
        self.oam[offset as usize]
    }

    pub fn write_oam_byte(&mut self, value: u8, offset: u32) {
        self.oam[offset as usize] = value;
    }
}

// MMIO register file, offsets relative to 0x0400_0000.
impl Lcd {
    pub fn read_register_byte(&self, offset: u32) -> u8 {
        match offset {
            0x00..=0x01 => self.control.get_data(offset & 0b1),
            0x04..=0x05 => self.status.get_data(offset & 0b1),
            0x06..=0x07 => self.vcount.get_data(offset & 0b1),
            0x08..=0x0F => {
                let bg = ((offset - 0x08) / 2) as usize;
                self.backgrounds[bg].control.get_data(offset & 0b1)
            }
            0x48..=0x49 => self.window_in.get_data(offset & 0b1),
            0x4A..=0x4B => self.window_out.get_data(offset & 0b1),
            0x50..=0x51 => self.blend_control.get_data(offset & 0b1),
            0x52..=0x53 => self.blend_alpha.get_data(offset & 0b1),
            // The remaining display registers are write-only.
            _ => 0,
        }
    }

    pub fn write_register_byte(&mut self, value: u8, offset: u32) {
        match offset {
            0x00..=0x01 => self.control = self.control.set_data(value, offset & 0b1),
            0x02..=0x03 => {} // green swap, unimplemented
            0x04..=0x05 => {
                // The flag bits (0..2) are read-only.
                let merged = self.status.set_data(value, offset & 0b1);
                self.status = (merged & !0b111) | (self.status & 0b111);
            }
            0x06..=0x07 => {} // VCOUNT is read-only
            0x08..=0x0F => {
                let bg = ((offset - 0x08) / 2) as usize;
                self.backgrounds[bg].control =
                    self.backgrounds[bg].control.set_data(value, offset & 0b1);
            }
            0x10..=0x1F => {
                let bg = ((offset - 0x10) / 4) as usize;
                let background = &mut self.backgrounds[bg];
                if offset & 0b10 == 0 {
                    background.h_offset = background.h_offset.set_data(value, offset & 0b1);
                } else {
                    background.v_offset = background.v_offset.set_data(value, offset & 0b1);
                }
            }
            0x20..=0x27 | 0x30..=0x37 => {
                let affine = ((offset - 0x20) / 0x10) as usize;
                let param = ((offset & 0xF) / 2) as usize;
                self.affine[affine].write_param(value, param, offset & 0b1);
            }
            0x28..=0x2B | 0x38..=0x3B => {
                let affine = ((offset - 0x20) / 0x10) as usize;
                self.affine[affine].write_reference_x(value, offset & 0b11);
            }
            0x2C..=0x2F | 0x3C..=0x3F => {
                let affine = ((offset - 0x20) / 0x10) as usize;
                self.affine[affine].write_reference_y(value, offset & 0b11);
            }
            0x40..=0x43 => {
                let window = ((offset - 0x40) / 2) as usize;
                self.window_horizontal[window] =
                    self.window_horizontal[window].set_data(value, offset & 0b1);
            }
            0x44..=0x47 => {
                let window = ((offset - 0x44) / 2) as usize;
                self.window_vertical[window] =
                    self.window_vertical[window].set_data(value, offset & 0b1);
            }
            0x48..=0x49 => self.window_in = self.window_in.set_data(value, offset & 0b1),
            0x4A..=0x4B => self.window_out = self.window_out.set_data(value, offset & 0b1),
            0x4C..=0x4F => self.mosaic = self.mosaic.set_data(value, offset & 0b11),
            0x50..=0x51 => self.blend_control = self.blend_control.set_data(value, offset & 0b1),
            0x52..=0x53 => self.blend_alpha = self.blend_alpha.set_data(value, offset & 0b1),
            0x54..=0x55 => {
                self.blend_brightness = self.blend_brightness.set_data(value, offset & 0b1)
            }
            _ => log::debug!("write to unimplemented display register 0x{:03X}", offset),
        }
    }
}
