pub mod led_logic;
