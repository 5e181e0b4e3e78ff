use dicom::dictionary_std::uids;

/// UI (Unique Identifier) value representation.
pub type UI = String;

/// IS (Integer String) value representation, once parsed.
pub type IS = i32;

/// DS (Decimal String) value representation, once parsed.
pub type DS = f64;

/// Root of every JPEG-family transfer syntax (baseline, extended, lossless, JPEG-LS, JPEG 2000).
pub const JPEG_TRANSFER_SYNTAX_ROOT: &str = "1.2.840.10008.1.2.4";

/// SOP classes that encode several frames with per-frame functional groups.
pub const ENHANCED_SOP_CLASSES: [&str; 6] = [
	uids::ENHANCED_MR_IMAGE_STORAGE,
	// Enhanced MR Color Image Storage
	"1.2.840.10008.5.1.4.1.1.4.3",
	// Enhanced CT Image Storage
	"1.2.840.10008.5.1.4.1.1.2.1",
	// Enhanced PET Image Storage
	"1.2.840.10008.5.1.4.1.1.130",
	// Enhanced US Volume Storage
	"1.2.840.10008.5.1.4.1.1.6.2",
	// Enhanced XA Image Storage
	"1.2.840.10008.5.1.4.1.1.12.1.1",
];

/// SOP class whose frame 0 is flattened before per-image attributes are read.
pub const FRAME_EXTRACTION_SOP_CLASS: &str = uids::ENHANCED_MR_IMAGE_STORAGE;

/// MR Spectroscopy Storage
pub const SPECTROSCOPY_SOP_CLASS: &str = uids::MR_SPECTROSCOPY_STORAGE;

/// Instances of these SOP classes carry no diagnostic payload and never become images.
pub const IGNORED_SOP_CLASSES: [&str; 6] = [
	uids::RAW_DATA_STORAGE,
	// Grayscale Softcopy Presentation State Storage
	"1.2.840.10008.5.1.4.1.1.11.1",
	// Basic Text SR Storage
	"1.2.840.10008.5.1.4.1.1.88.11",
	// Enhanced SR Storage
	"1.2.840.10008.5.1.4.1.1.88.22",
	// Comprehensive SR Storage
	"1.2.840.10008.5.1.4.1.1.88.33",
	// Siemens CSA Non-Image Storage (private)
	"1.3.12.2.1107.5.9.1",
];
