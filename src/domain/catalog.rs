//! In-memory guitar catalog served by the storefront

use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Guitar {
    pub id: u32,
    pub name: &'static str,
    pub short_description: &'static str,
    pub description: &'static str,
    pub price: f64,
}

const GUITARS: [Guitar; 5] = [
    Guitar {
        id: 1,
        name: "TanStack Ukelele",
        short_description: "A soprano ukulele for beach sessions.",
        description: "Laminated mahogany body, nylon strings and aquila tuners. Small enough to \
                      take anywhere and forgiving for first-time players.",
        price: 299.0,
    },
    Guitar {
        id: 2,
        name: "Video Game Guitar",
        short_description: "An electric guitar with pixel-art inlays.",
        description: "Alder body with dual humbuckers and an 8-bit inspired fretboard inlay set. \
                      Built for chiptune covers at stage volume.",
        price: 699.0,
    },
    Guitar {
        id: 3,
        name: "Superhero Guitar",
        short_description: "A flashy electric with a cape-red finish.",
        description: "Bolt-on maple neck, locking tremolo and a gloss red finish. Comes with a \
                      matching strap and hard case.",
        price: 699.0,
    },
    Guitar {
        id: 4,
        name: "Motherboard Guitar",
        short_description: "A circuit-board themed electric.",
        description: "Solid ash body with a printed circuit-board top and a single active \
                      pickup. For players who debug by day and shred by night.",
        price: 649.0,
    },
    Guitar {
        id: 5,
        name: "Racing Guitar",
        short_description: "A lightweight electric in checkered-flag livery.",
        description: "Chambered mahogany body keeps the weight down; a coil-split switch gives \
                      single-coil snap on demand.",
        price: 679.0,
    },
];

pub fn guitars() -> &'static [Guitar] {
    &GUITARS
}
