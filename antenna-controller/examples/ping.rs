use antenna_controller::{AntennaController, Command, serial::SerialAntennaController};
use std::time::Duration;

/*
 * Opens the mount controller port, pings it and reads back the current position.
 *
 * Without hardware, a virtual pair of ports can be created with:
 *
 * socat -d -d pty,raw,echo=0 pty,raw,echo=0
 *
 * and the firmware replies typed by hand on the other end ("Success | 12.5").
 */

fn main() {
    let port = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/dev/ttyACM0".to_string());
    let baud_rate = 115200;

    let mut controller = SerialAntennaController::new(&port, baud_rate, Duration::from_secs(5));

    controller
        .open()
        .expect("Failed to open serial port");

    for command in [Command::Ping, Command::GetAz, Command::GetElevation] {
        match controller.transact(&command) {
            Ok(feedback) => println!("{:<14} {}", command.to_string(), feedback),
            Err(e) => println!("{:<14} failed: {}", command.to_string(), e),
        }
    }

    controller.close();
}
